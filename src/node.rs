//! The follower node: shared sensor state fed by transport callbacks and
//! the fixed-rate loop that blends the two behaviors into one command.

use anyhow::{Context, Result};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, warn};

use crate::config::FollowerParams;
use crate::control::{
    AvoidanceController, FormationController, FusionController, VelocityCommand,
};
use crate::lidar::{DirectionalDistances, SCAN_SIZE};
use crate::rules::ControllerRules;

/// Outbound transport seam; a real deployment publishes to the robot's
/// `cmd_vel` topic through this.
pub trait CommandSink: Send {
    fn publish(&mut self, cmd: VelocityCommand) -> Result<()>;
}

/// Latest sensor data, written by the transport callbacks and consumed
/// once per control cycle.
#[derive(Debug, Default)]
struct SensorState {
    scan: Option<Vec<f32>>,
    directional: Option<DirectionalDistances>,
    bearing_deg: Option<f32>,
}

/// Clonable handle to the shared sensor state. Producers and the loop
/// synchronize on one mutex, so each cycle sees a consistent snapshot
/// of scan and bearing.
#[derive(Debug, Clone)]
pub struct SensorHub {
    state: Arc<Mutex<SensorState>>,
    obstacle_half_window: i32,
}

impl SensorHub {
    pub fn new(obstacle_half_window: i32) -> Self {
        Self {
            state: Arc::new(Mutex::new(SensorState::default())),
            obstacle_half_window,
        }
    }

    /// Store a new range scan, replacing any unconsumed one, and derive
    /// the directional distance estimates from it. Scans with fewer than
    /// 360 samples are dropped.
    pub fn push_scan(&self, mut ranges: Vec<f32>) {
        if ranges.len() < SCAN_SIZE {
            warn!(samples = ranges.len(), "dropping short scan");
            return;
        }
        ranges.truncate(SCAN_SIZE);
        let directional = DirectionalDistances::from_scan(&ranges, self.obstacle_half_window);

        let mut state = self.state.lock().unwrap();
        state.scan = Some(ranges);
        state.directional = Some(directional);
    }

    /// Store the latest bearing-to-leader angle in degrees.
    pub fn push_bearing(&self, bearing_deg: f32) {
        if !bearing_deg.is_finite() {
            warn!(bearing_deg, "dropping non-finite bearing");
            return;
        }
        self.state.lock().unwrap().bearing_deg = Some(bearing_deg);
    }

    fn snapshot(&self) -> (Option<Vec<f32>>, Option<DirectionalDistances>, Option<f32>) {
        let state = self.state.lock().unwrap();
        (state.scan.clone(), state.directional, state.bearing_deg)
    }

    /// Drop the consumed sensor data so the next cycle requires fresh
    /// input instead of re-acting on a stale reading.
    fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.scan = None;
        state.directional = None;
        state.bearing_deg = None;
    }
}

/// What one control cycle did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome {
    /// Both behaviors decided; the blended command was published and the
    /// sensor state cleared.
    Commanded(VelocityCommand),
    /// Sensor data was missing; the stop command was published and the
    /// sensor state left in place for the next cycle.
    SafeStop,
}

/// The follower control node: three fuzzy controllers around one
/// fixed-rate loop.
pub struct FuzzyFollower {
    params: FollowerParams,
    hub: SensorHub,
    formation: FormationController,
    avoidance: AvoidanceController,
    fusion: FusionController,
    sink: Box<dyn CommandSink>,
}

impl FuzzyFollower {
    pub fn new(params: FollowerParams, sink: Box<dyn CommandSink>) -> Result<Self> {
        Self::with_rules(params, ControllerRules::default(), sink)
    }

    pub fn with_rules(
        params: FollowerParams,
        rules: ControllerRules,
        sink: Box<dyn CommandSink>,
    ) -> Result<Self> {
        let formation = FormationController::new(
            rules.formation,
            params.desired_distance,
            params.leader_half_window,
        )
        .context("building formation controller")?;
        let avoidance =
            AvoidanceController::new(rules.avoidance).context("building avoidance controller")?;
        let fusion = FusionController::new(rules.fusion).context("building fusion controller")?;
        let hub = SensorHub::new(params.obstacle_half_window);

        Ok(Self {
            params,
            hub,
            formation,
            avoidance,
            fusion,
            sink,
        })
    }

    /// Handle for the transport callbacks that feed this node.
    pub fn hub(&self) -> SensorHub {
        self.hub.clone()
    }

    /// Run one control cycle: decide both behaviors, blend if both are
    /// available, otherwise fall back to the stop command.
    pub fn cycle(&mut self) -> Result<CycleOutcome> {
        let (scan, directional, bearing) = self.hub.snapshot();

        let formation = self.formation.decide(scan.as_deref(), bearing);
        let avoidance = self.avoidance.decide(directional.as_ref());

        let (formation, avoidance, directional) = match (formation, avoidance, directional) {
            (Some(f), Some(a), Some(d)) => (f, a, d),
            // Startup or sensor dropout: stop, keep whatever data exists
            // and retry next cycle.
            _ => {
                self.sink.publish(VelocityCommand::STOP)?;
                return Ok(CycleOutcome::SafeStop);
            }
        };

        let weights = self
            .fusion
            .blend_weights(formation.distance_error.abs(), directional.closest());
        let command = weights.blend(&formation, &avoidance);

        debug!(
            formation_vel = formation.velocity,
            formation_rot = formation.angular,
            avoidance_vel = avoidance.velocity,
            avoidance_rot = avoidance.angular,
            fused_vel = command.linear,
            fused_rot = command.angular,
            "cycle"
        );

        self.sink.publish(command)?;
        self.hub.clear();
        Ok(CycleOutcome::Commanded(command))
    }

    /// Drive the loop at the configured rate until `shutdown` is set,
    /// then publish a final stop command before returning.
    pub async fn run(&mut self, shutdown: Arc<AtomicBool>) -> Result<()> {
        let period = Duration::from_secs_f32(1.0 / self.params.loop_rate_hz);
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while !shutdown.load(Ordering::Relaxed) {
            ticker.tick().await;
            if let Err(e) = self.cycle() {
                warn!("cycle failed: {e:#}");
            }
        }

        self.sink.publish(VelocityCommand::STOP)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::BlendWeights;
    use crate::rules;

    #[derive(Clone, Default)]
    struct RecordingSink {
        published: Arc<Mutex<Vec<VelocityCommand>>>,
    }

    impl CommandSink for RecordingSink {
        fn publish(&mut self, cmd: VelocityCommand) -> Result<()> {
            self.published.lock().unwrap().push(cmd);
            Ok(())
        }
    }

    impl RecordingSink {
        fn commands(&self) -> Vec<VelocityCommand> {
            self.published.lock().unwrap().clone()
        }
    }

    fn follower_with_sink() -> (FuzzyFollower, RecordingSink) {
        let sink = RecordingSink::default();
        let node = FuzzyFollower::new(FollowerParams::default(), Box::new(sink.clone())).unwrap();
        (node, sink)
    }

    fn leader_scan() -> Vec<f32> {
        // Leader visible at scan angle 330 (bearing 30 deg), 1 m away;
        // everything else undetected.
        let mut scan = vec![f32::INFINITY; SCAN_SIZE];
        for i in 327..=333 {
            scan[i] = 1.0;
        }
        scan
    }

    #[test]
    fn no_sensor_data_publishes_stop() {
        let (mut node, sink) = follower_with_sink();
        assert_eq!(node.cycle().unwrap(), CycleOutcome::SafeStop);
        assert_eq!(sink.commands(), vec![VelocityCommand::STOP]);
    }

    #[test]
    fn scan_without_bearing_publishes_stop_and_keeps_the_scan() {
        let (mut node, sink) = follower_with_sink();
        node.hub().push_scan(leader_scan());

        assert_eq!(node.cycle().unwrap(), CycleOutcome::SafeStop);
        assert_eq!(sink.commands(), vec![VelocityCommand::STOP]);

        // The scan was not cleared: supplying the missing bearing is
        // enough for the next cycle to command motion.
        node.hub().push_bearing(30.0);
        assert!(matches!(
            node.cycle().unwrap(),
            CycleOutcome::Commanded(_)
        ));
    }

    #[test]
    fn close_obstacle_without_bearing_still_stops() {
        let (mut node, sink) = follower_with_sink();
        let mut scan = leader_scan();
        scan[0] = 0.1;
        node.hub().push_scan(scan);

        assert_eq!(node.cycle().unwrap(), CycleOutcome::SafeStop);
        assert_eq!(sink.commands(), vec![VelocityCommand::STOP]);
    }

    #[test]
    fn command_is_the_weighted_blend_of_both_behaviors() {
        let (mut node, sink) = follower_with_sink();
        node.hub().push_scan(leader_scan());
        node.hub().push_bearing(30.0);

        let outcome = node.cycle().unwrap();
        let CycleOutcome::Commanded(cmd) = outcome else {
            panic!("expected a command, got {outcome:?}");
        };
        assert_eq!(sink.commands(), vec![cmd]);

        // Recompute the blend with standalone controllers on the same
        // inputs; the published command must match exactly.
        let params = FollowerParams::default();
        let formation = FormationController::new(
            rules::formation_rules(),
            params.desired_distance,
            params.leader_half_window,
        )
        .unwrap();
        let avoidance = AvoidanceController::new(rules::avoidance_rules()).unwrap();
        let fusion = FusionController::new(rules::fusion_rules()).unwrap();

        let scan = leader_scan();
        let dirs = DirectionalDistances::from_scan(&scan, params.obstacle_half_window);
        let f = formation.decide(Some(&scan), Some(30.0)).unwrap();
        let a = avoidance.decide(Some(&dirs)).unwrap();
        let w: BlendWeights = fusion.blend_weights(f.distance_error.abs(), dirs.closest());

        assert_eq!(cmd.linear, f.velocity * w.formation + a.velocity * w.collision);
        assert_eq!(cmd.angular, f.angular * w.formation + a.angular * w.collision);
        assert!(cmd.linear > 0.0, "expected forward motion, got {cmd:?}");
    }

    #[test]
    fn successful_cycle_clears_sensor_state() {
        let (mut node, sink) = follower_with_sink();
        node.hub().push_scan(leader_scan());
        node.hub().push_bearing(30.0);

        assert!(matches!(node.cycle().unwrap(), CycleOutcome::Commanded(_)));
        // No new sensor input: the follower must fall back to the safe
        // state instead of reusing the consumed data.
        assert_eq!(node.cycle().unwrap(), CycleOutcome::SafeStop);
        assert_eq!(sink.commands().last(), Some(&VelocityCommand::STOP));
    }

    #[test]
    fn short_scans_are_dropped() {
        let (mut node, _sink) = follower_with_sink();
        node.hub().push_scan(vec![1.0; 10]);
        node.hub().push_bearing(0.0);
        assert_eq!(node.cycle().unwrap(), CycleOutcome::SafeStop);
    }

    #[test]
    fn non_finite_bearing_is_ignored() {
        let (mut node, _sink) = follower_with_sink();
        node.hub().push_scan(leader_scan());
        node.hub().push_bearing(f32::NAN);
        assert_eq!(node.cycle().unwrap(), CycleOutcome::SafeStop);
    }

    #[tokio::test]
    async fn shutdown_publishes_a_final_stop() {
        let sink = RecordingSink::default();
        let mut node =
            FuzzyFollower::new(FollowerParams::default(), Box::new(sink.clone())).unwrap();

        let shutdown = Arc::new(AtomicBool::new(true));
        node.run(shutdown).await.unwrap();

        assert_eq!(sink.commands(), vec![VelocityCommand::STOP]);
    }
}
