use anyhow::{Context, Result};
use serde::Deserialize;
use std::{env, fs};

/// Follower runtime parameters loaded from a TOML file.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct FollowerParams {
    // Formation parameters
    pub desired_distance: f32,
    // Control loop parameters
    pub loop_rate_hz: f32,
    // Lidar averaging windows (+/- samples around a scan angle)
    pub obstacle_half_window: i32,
    pub leader_half_window: i32,
    // Topic names, relative to the robot namespace
    pub scan_topic: String,
    pub bearing_topic: String,
    pub cmd_vel_topic: String,
    // Optional TOML file replacing the built-in rule bases
    pub rules_path: Option<String>,
    // Debug options
    pub debug_mode: bool,
}

impl Default for FollowerParams {
    fn default() -> Self {
        Self {
            desired_distance: 0.75,
            loop_rate_hz: 5.0,
            obstacle_half_window: 7,
            leader_half_window: 3,
            scan_topic: "scan".to_string(),
            bearing_topic: "angle_to_leader".to_string(),
            cmd_vel_topic: "cmd_vel".to_string(),
            rules_path: None,
            debug_mode: false,
        }
    }
}

impl FollowerParams {
    /// Load parameters from the TOML file named by `CONFIG_PATH`,
    /// falling back to `./follower_params.toml`.
    pub fn load() -> Result<Self> {
        let config_path =
            env::var("CONFIG_PATH").unwrap_or_else(|_| "./follower_params.toml".to_string());
        let config_str = fs::read_to_string(&config_path)
            .with_context(|| format!("reading config file {config_path}"))?;
        toml::from_str(&config_str).with_context(|| format!("parsing {config_path}"))
    }

    /// Full topic name for the given robot namespace, e.g. `/robot1/scan`.
    pub fn namespaced(&self, robot_ns: &str, topic: &str) -> String {
        format!("/{robot_ns}/{topic}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_tuned_values() {
        let params = FollowerParams::default();
        assert_eq!(params.desired_distance, 0.75);
        assert_eq!(params.loop_rate_hz, 5.0);
        assert_eq!(params.obstacle_half_window, 7);
        assert_eq!(params.leader_half_window, 3);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let params: FollowerParams =
            toml::from_str("desired_distance = 1.2\ndebug_mode = true").unwrap();
        assert_eq!(params.desired_distance, 1.2);
        assert!(params.debug_mode);
        assert_eq!(params.loop_rate_hz, 5.0);
        assert_eq!(params.scan_topic, "scan");
    }

    #[test]
    fn namespaced_topics() {
        let params = FollowerParams::default();
        assert_eq!(params.namespaced("robot1", &params.scan_topic), "/robot1/scan");
        assert_eq!(
            params.namespaced("robot1", &params.bearing_topic),
            "/robot1/angle_to_leader"
        );
    }
}
