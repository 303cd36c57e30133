//! Environment-variable plumbing shared by [`crate::knobs`] and the
//! binary's startup logging setup.

use std::{
    env,
    fmt::Debug,
    str::FromStr,
};

/// Read `name` from the environment, falling back to `default` if unset,
/// non-unicode, or unparseable. Every tunable in [`crate::knobs`] is read
/// through this so the whole config surface is overridable per-process
/// without a second config file format.
pub fn env_config<T: Debug + FromStr>(name: &str, default: T) -> T
where
    <T as FromStr>::Err: Debug,
{
    let var_s = match env::var(name) {
        Ok(s) => s,
        Err(env::VarError::NotPresent) => return default,
        Err(env::VarError::NotUnicode(..)) => {
            tracing::warn!("Invalid value for {name}, falling back to {default:?}.");
            return default;
        },
    };
    match T::from_str(&var_s) {
        Ok(v) => {
            tracing::info!("Overriding {name} to {v:?} from environment");
            v
        },
        Err(e) => {
            tracing::warn!("Invalid value {var_s} for {name}, falling back to {default:?}: {e:?}");
            default
        },
    }
}

/// Initializes `tracing-subscriber` from `RUST_LOG` (default `info`). Call
/// once at process startup, before spawning any workers.
pub fn init_tracing() {
    use tracing_subscriber::{
        fmt,
        EnvFilter,
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
