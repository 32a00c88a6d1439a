//! Element and attribute names of the code integrity policy schema, and the child order
//! the schema mandates for the containers this crate creates.

pub const SI_POLICY: &str = "SiPolicy";
pub const FILE_RULES: &str = "FileRules";
pub const SIGNERS: &str = "Signers";
pub const SIGNER: &str = "Signer";
pub const CERT_ROOT: &str = "CertRoot";
pub const CERT_PUBLISHER: &str = "CertPublisher";
pub const FILE_ATTRIB: &str = "FileAttrib";
pub const FILE_ATTRIB_REF: &str = "FileAttribRef";
pub const ALLOW: &str = "Allow";
pub const DENY: &str = "Deny";
pub const FILE_RULE: &str = "FileRule";
pub const SIGNING_SCENARIOS: &str = "SigningScenarios";
pub const SIGNING_SCENARIO: &str = "SigningScenario";
pub const PRODUCT_SIGNERS: &str = "ProductSigners";
pub const ALLOWED_SIGNERS: &str = "AllowedSigners";
pub const ALLOWED_SIGNER: &str = "AllowedSigner";
pub const DENIED_SIGNER: &str = "DeniedSigner";
pub const FILE_RULES_REF: &str = "FileRulesRef";
pub const FILE_RULE_REF: &str = "FileRuleRef";
pub const CI_SIGNERS: &str = "CiSigners";
pub const CI_SIGNER: &str = "CiSigner";
pub const UPDATE_POLICY_SIGNER: &str = "UpdatePolicySigner";
pub const SUPPLEMENTAL_POLICY_SIGNER: &str = "SupplementalPolicySigner";

pub const ID: &str = "ID";
pub const NAME: &str = "Name";
pub const VALUE: &str = "Value";
pub const TYPE: &str = "Type";
pub const SIGNER_ID: &str = "SignerId";
pub const RULE_ID: &str = "RuleID";
pub const FRIENDLY_NAME: &str = "FriendlyName";
pub const HASH: &str = "Hash";
pub const FILE_NAME: &str = "FileName";
pub const INTERNAL_NAME: &str = "InternalName";
pub const FILE_DESCRIPTION: &str = "FileDescription";
pub const PRODUCT_NAME: &str = "ProductName";
pub const FILE_PATH: &str = "FilePath";
pub const PACKAGE_FAMILY_NAME: &str = "PackageFamilyName";
pub const MINIMUM_FILE_VERSION: &str = "MinimumFileVersion";

/// Children of `<SiPolicy>` in schema order.
pub const SI_POLICY_ORDER: &[&str] = &[
    "VersionEx",
    "PolicyID",
    "BasePolicyID",
    "PlatformID",
    "PolicyTypeID",
    "Rules",
    "EKUs",
    FILE_RULES,
    SIGNERS,
    SIGNING_SCENARIOS,
    "UpdatePolicySigners",
    CI_SIGNERS,
    "HvciOptions",
    "Settings",
    "Macros",
    "SupplementalPolicySigners",
    "AppSettings",
];

/// Children of `<SigningScenario>` in schema order.
pub const SIGNING_SCENARIO_ORDER: &[&str] = &[
    PRODUCT_SIGNERS,
    "TestSigners",
    "TestSigningSigners",
    "AppIDTags",
];

/// Children of `<ProductSigners>` in schema order.
pub const PRODUCT_SIGNERS_ORDER: &[&str] = &[ALLOWED_SIGNERS, "DeniedSigners", FILE_RULES_REF];
