//! The `[console]` table.

use serde::Deserialize;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Console {
    shell: String,
}

impl Default for Console {
    fn default() -> Self {
        Console {
            shell: "/bin/sh".to_string(),
        }
    }
}

impl Console {
    #[inline]
    pub fn shell(&self) -> &str {
        &self.shell
    }
}
