//! Device attributes pushed when the server asks for them

use std::collections::BTreeMap;
use std::sync::Mutex;

pub trait ConfigDataProvider: Send + Sync {
    fn config_data(&self) -> BTreeMap<String, String>;

    /// Whether the map last pushed is still the current one
    fn is_current(&self) -> bool;

    fn on_pushed(&self, data: &BTreeMap<String, String>);
}

/// Fixed attribute map that remembers what was pushed last
#[derive(Debug, Default)]
pub struct StaticConfigData {
    data: BTreeMap<String, String>,
    pushed: Mutex<Option<BTreeMap<String, String>>>,
}

impl StaticConfigData {
    pub fn new(data: BTreeMap<String, String>) -> Self {
        Self {
            data,
            pushed: Mutex::new(None),
        }
    }
}

impl ConfigDataProvider for StaticConfigData {
    fn config_data(&self) -> BTreeMap<String, String> {
        self.data.clone()
    }

    fn is_current(&self) -> bool {
        let pushed = self.pushed.lock().unwrap_or_else(|e| e.into_inner());
        pushed.as_ref() == Some(&self.data)
    }

    fn on_pushed(&self, data: &BTreeMap<String, String>) {
        let mut pushed = self.pushed.lock().unwrap_or_else(|e| e.into_inner());
        *pushed = Some(data.clone());
    }
}
