//! Kernel feature probing through the executor `check` and `setup` commands.
use super::*;

pub type Features = u64;

iota! {
    pub const FEATURE_COVERAGE: Features = 1 << (iota);
    ,FEATURE_COMPARISONS
    ,FEATURE_EXTRA_COVERAGE
    ,FEATURE_SANDBOX_SETUID
    ,FEATURE_SANDBOX_NAMESPACE
    ,FEATURE_SANDBOX_ANDROID
    ,FEATURE_FAULT
    ,FEATURE_LEAK
    ,FEATURE_NET_INJECTION
    ,FEATURE_NET_DEVICES
    ,FEATURE_KCSAN
    ,FEATURE_DEVLINK_PCI
    ,FEATURE_USB_EMULATION
    ,FEATURE_VHCI_INJECTION
    ,FEATURE_WIFI_EMULATION
    ,FEATURE_802154
}

pub const FEATURES_NAME: [&str; 16] = [
    "code coverage",
    "comparison tracing",
    "extra coverage",
    "setuid sandbox",
    "namespace sandbox",
    "Android sandbox",
    "fault injection",
    "leak checking",
    "net packet injection",
    "net device setup",
    "concurrency sanitizer",
    "devlink PCI setup",
    "USB emulation",
    "hci packet injection",
    "wifi device emulation",
    "802.15.4 emulation",
];

#[derive(Debug, Error)]
pub enum DetectFeaturesError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("detect: {0}")]
    Detect(String),
}

pub fn detect_features(mut cmd: Command) -> Result<Features, DetectFeaturesError> {
    cmd.arg("check");
    let output = cmd.output()?;
    if output.status.success() {
        parse_features(&output.stdout)
    } else {
        let err = String::from_utf8_lossy(&output.stderr).into_owned();
        Err(DetectFeaturesError::Detect(format!(
            "'{:?}' : {}",
            cmd, err
        )))
    }
}

fn parse_features(out: &[u8]) -> Result<Features, DetectFeaturesError> {
    if out.len() != 8 {
        return Err(DetectFeaturesError::Detect(format!(
            "expected 8 bytes of features, got {}",
            out.len()
        )));
    }
    let mut val = [0; 8];
    val.copy_from_slice(out);
    Ok(u64::from_le_bytes(val))
}

/// Names of enabled features, for logging.
pub fn features_names(features: Features) -> Vec<&'static str> {
    FEATURES_NAME
        .iter()
        .enumerate()
        .filter(|(i, _)| features & (1 << i) != 0)
        .map(|(_, n)| *n)
        .collect()
}

#[derive(Debug, Error)]
pub enum SetupFeaturesError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("setup: {0}")]
    Setup(String),
}

pub fn setup_features(mut cmd: Command, features: Features) -> Result<(), SetupFeaturesError> {
    let feature_args = features_to_args(features);
    if feature_args.is_empty() {
        return Ok(());
    }

    cmd.arg("setup").args(&feature_args);
    let output = cmd.output()?;
    if !output.status.success() {
        let err = String::from_utf8_lossy(&output.stderr).into_owned();
        return Err(SetupFeaturesError::Setup(format!(
            "failed to run '{:?}': {}",
            cmd, err
        )));
    }

    Ok(())
}

/// Features that need a `setup` step, with the argument naming them.
const SETUP_ARGS: [(Features, &str); 5] = [
    (FEATURE_LEAK, "leak"),
    (FEATURE_FAULT, "fault"),
    (FEATURE_KCSAN, "kcsan"),
    (FEATURE_USB_EMULATION, "usb"),
    (FEATURE_802154, "802154"),
];

/// Env flags switched on by the presence of a feature.
const FEATURE_ENV_FLAGS: [(Features, EnvFlags); 6] = [
    (FEATURE_EXTRA_COVERAGE, FLAG_EXTRA_COVER),
    (FEATURE_NET_INJECTION, FLAG_ENABLE_TUN),
    (FEATURE_NET_DEVICES, FLAG_ENABLE_NETDEV),
    (FEATURE_DEVLINK_PCI, FLAG_ENABLE_DEVLINKPCI),
    (FEATURE_VHCI_INJECTION, FLAG_ENABLE_VHCI_INJECTION),
    (FEATURE_WIFI_EMULATION, FLAG_ENABLE_WIFI),
];

fn features_to_args(features: Features) -> Vec<String> {
    SETUP_ARGS
        .iter()
        .filter(|(f, _)| features & f != 0)
        .map(|(_, arg)| arg.to_string())
        .collect()
}

pub fn features_to_env_flags(features: Features, env: &mut EnvFlags) {
    for (f, flag) in FEATURE_ENV_FLAGS.iter() {
        if features & f != 0 {
            *env |= flag;
        }
    }
    // always requested
    *env |= FLAG_ENABLE_NETRESET | FLAG_ENABLE_CGROUPS | FLAG_ENABLE_CLOSEFDS;
}
