//! Configuration layering
//!
//! Later sources win: the optional config file, then `OBD_*` environment
//! variables (`OBD_PORT`, `OBD_BAUD_RATE`, ...), then command-line flags.

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use obd_protocol::LinkConfig;

/// Prefix of the environment variables read into [`LinkConfig`]
pub const ENV_PREFIX: &str = "OBD";

/// Values given on the command line
#[derive(Debug, Default)]
pub struct Overrides<'a> {
    pub config_file: Option<&'a str>,
    pub port: Option<&'a str>,
    pub baud_rate: Option<u32>,
}

/// Build the link configuration from the process environment.
///
/// Fails when `require_port` is set and no source names a serial port.
pub fn load(overrides: &Overrides<'_>, require_port: bool) -> Result<LinkConfig> {
    load_with_env(overrides, Environment::with_prefix(ENV_PREFIX), require_port)
}

/// [`load`] with an explicit environment source
pub fn load_with_env(
    overrides: &Overrides<'_>,
    env: Environment,
    require_port: bool,
) -> Result<LinkConfig> {
    let mut builder = Config::builder();
    if let Some(path) = overrides.config_file {
        builder = builder.add_source(File::with_name(path));
    }

    let config = builder
        .add_source(env.try_parsing(true))
        .set_override_option("port", overrides.port.map(str::to_string))?
        .set_override_option("baud_rate", overrides.baud_rate.map(i64::from))?
        .build()
        .context("failed to read configuration")?;

    if require_port && config.get_string("port").is_err() {
        bail!("no serial port given (pass PORT, set {}_PORT or use --config)", ENV_PREFIX);
    }

    config
        .try_deserialize::<LinkConfig>()
        .context("invalid link configuration")
}
