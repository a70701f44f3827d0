//! Network reachability and link-quality signal.
//!
//! Platform adapters push state in with [`ConnectivityMonitor::set_online`] and
//! [`ConnectivityMonitor::set_link_hint`]; the sync engine and the UI observe
//! it through [`ConnectivityMonitor::subscribe`].

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::events::{Subscribers, Subscription};

/// Link type reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkHint {
    #[default]
    Unknown,
    Slow2g,
    #[serde(rename = "2g")]
    TwoG,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "4g")]
    FourG,
    Wifi,
    Ethernet,
    /// The user asked the platform to conserve data
    SaveData,
}

impl LinkHint {
    pub const fn quality(self) -> ConnectionQuality {
        match self {
            Self::Slow2g | Self::TwoG | Self::ThreeG | Self::SaveData => ConnectionQuality::Slow,
            Self::FourG | Self::Wifi | Self::Ethernet => ConnectionQuality::Fast,
            Self::Unknown => ConnectionQuality::Unknown,
        }
    }
}

impl FromStr for LinkHint {
    type Err = std::convert::Infallible;

    /// Parse a platform effective-type string; unrecognized values are `Unknown`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hint = match s.trim().to_ascii_lowercase().as_str() {
            "slow-2g" | "slow2g" => Self::Slow2g,
            "2g" => Self::TwoG,
            "3g" => Self::ThreeG,
            "4g" | "5g" => Self::FourG,
            "wifi" | "wi-fi" => Self::Wifi,
            "ethernet" => Self::Ethernet,
            "save-data" | "savedata" => Self::SaveData,
            _ => Self::Unknown,
        };
        Ok(hint)
    }
}

/// Coarse link quality, used only to decide whether to defer downloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    #[default]
    Unknown,
    Slow,
    Fast,
}

impl fmt::Display for ConnectionQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::Slow => "slow",
            Self::Fast => "fast",
        })
    }
}

/// Snapshot delivered to connectivity subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectivityState {
    pub online: bool,
    pub link: LinkHint,
}

impl ConnectivityState {
    pub const fn quality(&self) -> ConnectionQuality {
        self.link.quality()
    }
}

/// Observable online/offline signal
///
/// Cheap to clone; clones observe and feed the same state.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    state: Arc<Mutex<ConnectivityState>>,
    subscribers: Subscribers<ConnectivityState>,
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(ConnectivityState {
                online,
                link: LinkHint::Unknown,
            })),
            subscribers: Subscribers::new(),
        }
    }

    fn guard(&self) -> MutexGuard<'_, ConnectivityState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn state(&self) -> ConnectivityState {
        *self.guard()
    }

    pub fn is_online(&self) -> bool {
        self.guard().online
    }

    pub fn is_offline(&self) -> bool {
        !self.is_online()
    }

    pub fn connection_quality(&self) -> ConnectionQuality {
        self.guard().quality()
    }

    /// Register `on_change` and invoke it once right away with the current state.
    pub fn subscribe(
        &self,
        on_change: impl Fn(&ConnectivityState) + Send + Sync + 'static,
    ) -> Subscription {
        let current = self.state();
        on_change(&current);
        self.subscribers.subscribe(on_change)
    }

    /// Report reachability; subscribers hear about actual transitions only.
    pub fn set_online(&self, online: bool) {
        self.update(|state| state.online = online);
    }

    /// Report the platform link type.
    pub fn set_link_hint(&self, link: LinkHint) {
        self.update(|state| state.link = link);
    }

    fn update(&self, change: impl FnOnce(&mut ConnectivityState)) {
        let (before, after) = {
            let mut state = self.guard();
            let before = *state;
            change(&mut state);
            (before, *state)
        };

        if before == after {
            return;
        }

        if before.online != after.online {
            if after.online {
                tracing::info!("Connectivity restored ({} link)", after.quality());
            } else {
                tracing::info!("Connectivity lost");
            }
        } else {
            tracing::debug!("Link quality changed to {}", after.quality());
        }
        self.subscribers.emit(&after);
    }

    /// Drop every registered subscriber.
    pub fn shutdown(&self) {
        self.subscribers.clear();
    }
}
