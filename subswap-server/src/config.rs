use bitcoin::FeeRate;
use bitcoin::Network;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use subswap_core::fee::MAX_CONF_TARGET;
use subswap_core::Error;
use subswap_core::ErrorContext;
use subswap_core::FeePolicy;

/// Runtime configuration of a [`crate::SwapServer`].
///
/// Every field has a default, so an empty TOML document is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub network: Network,
    /// Blocks between the current height and the lock height of a new service swap.
    pub lock_delta: u32,
    /// A client refuses to watch a swap locked further than this many blocks in the future.
    pub max_client_lock_delta: u32,
    pub default_conf_target: u32,
    /// Ceiling for fee rates supplied by callers.
    pub max_fee_rate_sat_per_vb: u64,
    /// Events each subscriber of a [`crate::PeerNotifier`] buffers before events are dropped.
    pub subscriber_queue_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: Network::Regtest,
            lock_delta: 72,
            max_client_lock_delta: 1008,
            default_conf_target: 6,
            max_fee_rate_sat_per_vb: 10_000,
            subscriber_queue_size: 64,
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, Error> {
        let config: Self = toml::from_str(s)
            .map_err(Error::invalid_parameters)
            .context("failed to parse config")?;

        config.validate()?;

        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let s = fs::read_to_string(path)
            .map_err(Error::invalid_parameters)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        Self::from_toml_str(&s)
    }

    pub fn fee_policy(&self) -> Result<FeePolicy, Error> {
        let max_fee_rate = FeeRate::from_sat_per_vb(self.max_fee_rate_sat_per_vb)
            .ok_or_else(|| {
                Error::invalid_parameters(format!(
                    "max fee rate of {} sat/vB overflows",
                    self.max_fee_rate_sat_per_vb
                ))
            })?;

        Ok(FeePolicy::new(max_fee_rate, self.default_conf_target))
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.lock_delta == 0 {
            return Err(Error::invalid_parameters("lock_delta must be positive"));
        }

        if self.max_client_lock_delta == 0 {
            return Err(Error::invalid_parameters(
                "max_client_lock_delta must be positive",
            ));
        }

        if !(1..=MAX_CONF_TARGET).contains(&self.default_conf_target) {
            return Err(Error::invalid_parameters(format!(
                "default_conf_target must be within 1..={MAX_CONF_TARGET}"
            )));
        }

        if self.subscriber_queue_size == 0 {
            return Err(Error::invalid_parameters(
                "subscriber_queue_size must be positive",
            ));
        }

        self.fee_policy()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use subswap_core::ErrorKind;

    #[test]
    fn empty_document_is_default() {
        assert_eq!(Config::from_toml_str("").unwrap(), Config::default());
    }

    #[test]
    fn parse_overrides() {
        let config = Config::from_toml_str(
            r#"
network = "testnet"
lock_delta = 144
subscriber_queue_size = 8
"#,
        )
        .unwrap();

        assert_eq!(config.network, Network::Testnet);
        assert_eq!(config.lock_delta, 144);
        assert_eq!(config.subscriber_queue_size, 8);
        assert_eq!(config.max_client_lock_delta, 1008);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = Config::from_toml_str("lock_detla = 10").unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidParameters);
    }

    #[test]
    fn invalid_values_are_rejected() {
        for doc in [
            "lock_delta = 0",
            "subscriber_queue_size = 0",
            "default_conf_target = 2000",
            "max_fee_rate_sat_per_vb = 9223372036854775807",
        ] {
            let err = Config::from_toml_str(doc).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidParameters, "{doc}");
        }
    }
}
