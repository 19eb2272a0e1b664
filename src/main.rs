use anyhow::{bail, Context, Result};
use std::env;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{debug, info, warn, Level};

use swarm_follower::control::VelocityCommand;
use swarm_follower::node::CommandSink;
use swarm_follower::rules::ControllerRules;
use swarm_follower::{FollowerParams, FuzzyFollower};

/// Stand-in command sink that logs each published command together with
/// the topic a transport adapter would publish it on.
struct CmdVelLog {
    topic: String,
}

impl CommandSink for CmdVelLog {
    fn publish(&mut self, cmd: VelocityCommand) -> Result<()> {
        debug!(
            topic = %self.topic,
            linear = cmd.linear,
            angular = cmd.angular,
            "publish"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let Some(robot_ns) = env::args().nth(1) else {
        bail!("usage: swarm_follower <robot_namespace>");
    };

    let params = FollowerParams::load();
    let level = match &params {
        Ok(p) if p.debug_mode => Level::DEBUG,
        _ => Level::INFO,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let params = match params {
        Ok(params) => params,
        Err(e) => {
            warn!("using default parameters: {e:#}");
            FollowerParams::default()
        }
    };

    info!(
        scan = %params.namespaced(&robot_ns, &params.scan_topic),
        bearing = %params.namespaced(&robot_ns, &params.bearing_topic),
        cmd_vel = %params.namespaced(&robot_ns, &params.cmd_vel_topic),
        "follower starting"
    );

    let rules = match &params.rules_path {
        Some(path) => ControllerRules::load(path).context("loading rule bases")?,
        None => ControllerRules::default(),
    };

    let sink = CmdVelLog {
        topic: params.namespaced(&robot_ns, &params.cmd_vel_topic),
    };
    let mut node = FuzzyFollower::with_rules(params, rules, Box::new(sink))
        .context("building follower node")?;

    // The transport adapter feeds this handle from the scan and bearing
    // subscriptions.
    let _hub = node.hub();

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::Relaxed);
    })
    .context("installing ctrl-c handler")?;

    node.run(shutdown).await?;

    info!("shutting down");
    Ok(())
}
