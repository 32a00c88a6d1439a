//! Identifier generation for new policy nodes.

use uuid::Uuid;

/// Produces opaque identifier suffixes for generated node IDs (`ID_SIGNER_A_<suffix>` etc.).
///
/// Every call must return a value not returned before by the same generator.
pub trait IdGenerator {
    fn next_id(&mut self) -> String;
}

/// Random 128-bit identifiers rendered as 32 uppercase hex digits.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn next_id(&mut self) -> String {
        Uuid::new_v4().simple().to_string().to_uppercase()
    }
}

/// Deterministic counter-based identifiers in the same 32-digit format, for reproducible
/// output and tests.
#[derive(Debug, Clone, Default)]
pub struct SequentialIdGenerator {
    counter: u128,
}

impl SequentialIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_id(&mut self) -> String {
        self.counter += 1;
        format!("{:032X}", self.counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_random_ids_are_uppercase_hex_without_dashes() {
        let mut ids = RandomIdGenerator;
        let id = ids.next_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
    }

    #[test]
    fn test_random_ids_do_not_repeat() {
        let mut ids = RandomIdGenerator;
        let seen: HashSet<String> = (0..256).map(|_| ids.next_id()).collect();
        assert_eq!(seen.len(), 256);
    }

    #[test]
    fn test_sequential_ids() {
        let mut ids = SequentialIdGenerator::new();
        assert_eq!(ids.next_id(), "00000000000000000000000000000001");
        assert_eq!(ids.next_id(), "00000000000000000000000000000002");
    }
}
