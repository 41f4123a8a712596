//! StaticConfiguration - a configuration held in memory.

use parking_lot::Mutex;

use crate::error::ConfigError;
use crate::ports::{Configuration, ConfigurationSource};

/// Returns whatever configuration it currently holds.
///
/// `replace` swaps it, so the next server restart picks the new one up.
#[derive(Default)]
pub struct StaticConfiguration {
    current: Mutex<Configuration>,
}

impl StaticConfiguration {
    pub fn new(configuration: Configuration) -> Self {
        Self {
            current: Mutex::new(configuration),
        }
    }

    pub fn replace(&self, configuration: Configuration) {
        *self.current.lock() = configuration;
    }
}

impl ConfigurationSource for StaticConfiguration {
    fn load(&self) -> Result<Configuration, ConfigError> {
        let configuration = self.current.lock().clone();
        configuration.validate()?;
        Ok(configuration)
    }
}
