//! Online/offline transition detection.

#[derive(Debug, Default)]
pub struct ConnectivityMonitor {
    last: Option<bool>,
}

impl ConnectivityMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a probe result. Returns `true` only on an offline to online edge.
    pub fn observe(&mut self, online: bool) -> bool {
        let came_online = self.last == Some(false) && online;
        if self.last != Some(online) {
            tracing::info!(online, "Connectivity changed");
        }
        self.last = Some(online);
        came_online
    }

    pub fn is_online(&self) -> Option<bool> {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_offline_to_online_is_an_edge() {
        let mut monitor = ConnectivityMonitor::new();
        assert!(!monitor.observe(true));
        assert!(!monitor.observe(true));
        assert!(!monitor.observe(false));
        assert!(!monitor.observe(false));
        assert!(monitor.observe(true));
        assert_eq!(monitor.is_online(), Some(true));
    }

    #[test]
    fn starting_offline_then_online_counts() {
        let mut monitor = ConnectivityMonitor::new();
        assert!(!monitor.observe(false));
        assert!(monitor.observe(true));
    }
}
