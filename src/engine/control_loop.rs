//! The fixed-cadence control loop
//!
//! One tick: drain detections into the repository, drain operator
//! commands, resolve the target, advance the pose, then push to the
//! actuator and publish a snapshot. The tick never awaits. It works on
//! a copy of `ControlState` that is committed only if the tick completes,
//! so a fault leaves pose and mode untouched.
//!
//! When the detector goes quiet, each frame period that passes without
//! a frame ages the tracks as a missed frame, so a stalled feed still
//! evicts subjects after the grace period.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace};

use crate::broadcast::{Snapshot, StateBroadcaster};
use crate::config::Config;
use crate::events::EngineEvent;
use crate::framing::TargetResolver;
use crate::geometry::{Envelope, Rig};
use crate::motion::{ActuatorCommand, ActuatorLink, MotionPlanner};
use crate::presets::PresetStore;
use crate::state::ControlState;
use crate::tracking::{RawDetection, SubjectRepository};

use super::commands::{
    Command, CommandError, CommandOutcome, CommandRequest, CommandResult, EngineHandle,
};

type PendingReply = (oneshot::Sender<CommandResult>, CommandResult);

pub struct Engine {
    state: ControlState,
    repository: SubjectRepository,
    resolver: TargetResolver,
    planner: MotionPlanner,
    presets: Arc<PresetStore>,
    actuator: ActuatorLink,
    broadcaster: Arc<StateBroadcaster>,
    events: broadcast::Sender<EngineEvent>,
    commands: mpsc::Receiver<CommandRequest>,
    detections: mpsc::Receiver<Vec<RawDetection>>,
    envelope: Envelope,
    period: Duration,
    /// Nominal time between detector frames
    frame_period: Duration,
    /// Time since the last detector frame not yet counted as a miss
    feed_silence: Duration,
    broadcast_every: u64,
    faults: u64,
    #[cfg(test)]
    fault_next_tick: bool,
}

impl Engine {
    /// Build an engine from a configuration that already passed
    /// `Config::validate`. The tick-0 snapshot is published right away so
    /// `EngineHandle::latest` is never empty.
    pub fn new(config: &Config) -> (Self, EngineHandle) {
        let (command_tx, command_rx) = mpsc::channel(config.motion.command_capacity);
        let (detection_tx, detection_rx) = mpsc::channel(config.tracking.inbox_capacity);
        let (event_tx, _) = broadcast::channel(64);

        let broadcaster = Arc::new(StateBroadcaster::new(config.broadcast.queue_capacity));
        let presets = Arc::new(PresetStore::new(config.presets.iter().cloned()));
        let envelope = config.envelope;

        let mut actuator = ActuatorLink::new(
            config.motion.actuator_epsilon,
            Rig::from_envelope(&envelope),
        );
        actuator.push(config.home);

        let engine = Self {
            state: ControlState::new(config.home),
            repository: SubjectRepository::new(&config.tracking),
            resolver: TargetResolver::new(config.framing.clone(), &config.tracking, envelope),
            planner: MotionPlanner::new(&config.motion, envelope),
            presets: Arc::clone(&presets),
            actuator,
            broadcaster: Arc::clone(&broadcaster),
            events: event_tx.clone(),
            commands: command_rx,
            detections: detection_rx,
            envelope,
            period: Duration::from_secs_f64(config.motion.tick_secs()),
            frame_period: Duration::from_secs_f64(config.tracking.frame_secs()),
            feed_silence: Duration::ZERO,
            broadcast_every: config.broadcast.every_ticks.max(1),
            faults: 0,
            #[cfg(test)]
            fault_next_tick: false,
        };
        engine.broadcaster.publish(engine.snapshot());

        let handle = EngineHandle {
            commands: command_tx,
            detections: detection_tx,
            broadcaster,
            presets,
            events: event_tx,
            envelope,
        };

        (engine, handle)
    }

    pub fn state(&self) -> &ControlState {
        &self.state
    }

    /// Receiver for the winch driver
    pub fn actuator(&self) -> watch::Receiver<Option<ActuatorCommand>> {
        self.actuator.subscribe()
    }

    /// Run ticks until `shutdown` fires, then close every subscriber
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> ControlState {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            period_ms = self.period.as_millis() as u64,
            "control loop started in {} mode",
            self.state.mode()
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    debug!("control loop received shutdown");
                    break;
                }

                _ = interval.tick() => {
                    self.tick();
                }
            }
        }

        self.commands.close();
        self.detections.close();
        self.broadcaster.close();

        info!(
            ticks = self.state.tick,
            movements = self.state.movements,
            faults = self.faults,
            "control loop stopped"
        );
        self.state
    }

    /// Run one control tick
    pub fn tick(&mut self) {
        let mut frames = Vec::new();
        while let Ok(frame) = self.detections.try_recv() {
            frames.push(frame);
        }
        let mut requests = Vec::new();
        while let Ok(request) = self.commands.try_recv() {
            requests.push(request);
        }

        let mut next = self.state.clone();
        let mut events = Vec::new();
        let mut replies: Vec<PendingReply> = Vec::new();

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.step(&mut next, frames, requests, &mut events, &mut replies)
        }));

        if let Err(payload) = result {
            self.faults += 1;
            error!(
                tick = self.state.tick,
                fault = panic_message(payload.as_ref()),
                "tick faulted, pose and mode left unchanged"
            );
            // dropping the senders answers the callers with Aborted
            return;
        }

        self.state = next;

        for (reply, result) in replies {
            let _ = reply.send(result);
        }
        for event in events {
            info!(%event, "engine event");
            let _ = self.events.send(event);
        }

        if self.actuator.push(self.state.pose) {
            self.state.movements += 1;
        }

        if self.state.tick % self.broadcast_every == 0 {
            self.broadcaster.publish(self.snapshot());
        }
    }

    fn step(
        &mut self,
        next: &mut ControlState,
        frames: Vec<Vec<RawDetection>>,
        requests: Vec<CommandRequest>,
        events: &mut Vec<EngineEvent>,
        replies: &mut Vec<PendingReply>,
    ) {
        let mut reports = Vec::with_capacity(frames.len());
        if frames.is_empty() {
            self.feed_silence += self.period;
            while self.feed_silence >= self.frame_period {
                self.feed_silence -= self.frame_period;
                reports.push(self.repository.age());
            }
        } else {
            self.feed_silence = Duration::ZERO;
            for frame in frames {
                reports.push(self.repository.upsert(frame));
            }
        }
        for report in reports {
            events.extend(report.acquired.into_iter().map(|id| EngineEvent::SubjectAcquired { id }));
            events.extend(report.evicted.into_iter().map(|id| EngineEvent::SubjectLost { id }));
        }

        for request in requests {
            let result = self.apply_command(next, request.command, events);
            replies.push((request.reply, result));
        }

        #[cfg(test)]
        {
            if std::mem::take(&mut self.fault_next_tick) {
                panic!("injected tick fault");
            }
        }

        let target = self.resolver.resolve(
            next.mode(),
            next.machine.manual_target(),
            self.repository.subjects(),
            next.pose,
            next.target,
        );
        let dt = self.period.as_secs_f64();
        let pose = self.planner.advance(target, next.pose, dt, &mut next.last_step);

        trace!(tick = next.tick, %target, %pose, "tick");
        next.target = target;
        next.pose = pose;
        next.tick += 1;
    }

    fn apply_command(
        &self,
        next: &mut ControlState,
        command: Command,
        events: &mut Vec<EngineEvent>,
    ) -> CommandResult {
        let change = match command {
            Command::SetMode(mode) => next.machine.set_mode(mode, next.pose, next.tick),
            Command::SetPosition(pose) => {
                let pose = self.envelope.clamp(pose);
                let change = next.machine.command_pose(pose, next.tick);
                events.push(EngineEvent::PositionCommanded { pose });
                change
            }
            Command::ApplyPreset(name) => {
                let pose = self.presets.apply(&name).map_err(CommandError::from)?;
                let change = next.machine.command_pose(pose, next.tick);
                events.push(EngineEvent::PresetApplied { name, pose });
                change
            }
        };

        if change.is_transition() {
            events.push(EngineEvent::ModeChanged {
                from: change.from,
                to: change.to,
            });
        }

        Ok(CommandOutcome {
            mode: change,
            target: next.machine.manual_target().unwrap_or(next.target),
        })
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            tick: self.state.tick,
            mode: self.state.mode(),
            pose: self.state.pose,
            target: self.state.target,
            subjects: self.repository.subjects().to_vec(),
            movements: self.state.movements,
            tracking: self.repository.stats(),
            faults: self.faults,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Axis, Pose};
    use crate::state::Mode;
    use crate::tracking::BoundingBox;
    use tokio_test::{assert_err, assert_ok, block_on};

    fn engine() -> (Engine, EngineHandle) {
        Engine::new(&Config::default())
    }

    fn person_at(cx: f64, confidence: f64, speaking: bool) -> RawDetection {
        RawDetection::new(BoundingBox::new(cx - 60.0, 120.0, cx + 60.0, 600.0), confidence)
            .speaking(speaking)
    }

    fn run_command(engine: &mut Engine, handle: &EngineHandle, command: Command) -> CommandResult {
        let rx = assert_ok!(handle.submit(command));
        engine.tick();
        block_on(rx).unwrap_or(Err(CommandError::Aborted))
    }

    #[test]
    fn test_starts_at_home_in_manual() {
        let (mut engine, _handle) = engine();
        engine.tick();
        assert_eq!(engine.state().mode(), Mode::Manual);
        assert_eq!(engine.state().pose, Pose::new(0.0, 2.5, 0.0));
        assert_eq!(engine.state().tick, 1);
        assert_eq!(engine.state().movements, 0);
    }

    #[test]
    fn test_initial_snapshot_is_published() {
        let (_engine, handle) = engine();
        let latest = handle.latest().unwrap();
        assert_eq!(latest.tick, 0);
        assert_eq!(latest.pose, Pose::new(0.0, 2.5, 0.0));
        assert_eq!(latest.mode, Mode::Manual);
    }

    #[test]
    fn test_preset_forces_manual_and_sets_target() {
        let (mut engine, handle) = engine();
        run_command(&mut engine, &handle, Command::SetMode(Mode::Speaker)).unwrap();
        assert_eq!(engine.state().mode(), Mode::Speaker);

        let outcome = run_command(&mut engine, &handle, Command::ApplyPreset("Plan Large".into()));
        let outcome = assert_ok!(outcome);

        assert_eq!(outcome.mode.to, Mode::Manual);
        assert_eq!(engine.state().mode(), Mode::Manual);
        assert_eq!(engine.state().target, Pose::new(0.0, 3.0, -4.0));
    }

    #[test]
    fn test_unknown_preset_is_reported() {
        let (mut engine, handle) = engine();
        let result = run_command(&mut engine, &handle, Command::ApplyPreset("Nope".into()));
        let err = assert_err!(result);
        assert!(matches!(err, CommandError::UnknownPreset(_)));
        assert_eq!(engine.state().mode(), Mode::Manual);
    }

    #[test]
    fn test_manual_switch_freezes_motion() {
        let (mut engine, handle) = engine();
        run_command(&mut engine, &handle, Command::SetMode(Mode::Wide)).unwrap();
        for _ in 0..20 {
            engine.tick();
        }
        let moving = engine.state().pose;
        assert_ne!(moving, Pose::new(0.0, 2.5, 0.0));

        run_command(&mut engine, &handle, Command::SetMode(Mode::Manual)).unwrap();
        let frozen = engine.state().pose;
        assert_eq!(frozen, moving);
        assert_eq!(engine.state().target, frozen);

        engine.tick();
        assert_eq!(engine.state().pose, frozen);
    }

    #[test]
    fn test_position_then_manual_converges_monotonically() {
        let (mut engine, handle) = engine();
        let mut subscription = handle.subscribe();

        let position = assert_ok!(handle.submit(Command::SetPosition(Pose::new(2.0, 2.0, 2.0))));
        let manual = assert_ok!(handle.submit(Command::SetMode(Mode::Manual)));
        engine.tick();
        assert_ok!(block_on(position).unwrap());
        let change = assert_ok!(block_on(manual).unwrap()).mode;
        assert!(!change.is_transition());

        let target = Pose::new(2.0, 2.0, 2.0);
        let mut previous = Pose::new(0.0, 2.5, 0.0);
        let mut snapshot = block_on(subscription.recv()).unwrap();
        for _ in 0..200 {
            for axis in Axis::ALL {
                let before = (target.get(axis) - previous.get(axis)).abs();
                let after = (target.get(axis) - snapshot.pose.get(axis)).abs();
                assert!(after < before || after == 0.0, "axis {axis} did not converge");
            }
            assert!(snapshot.pose.x <= 2.0 && snapshot.pose.y >= 2.0 && snapshot.pose.z <= 2.0);

            previous = snapshot.pose;
            engine.tick();
            snapshot = block_on(subscription.recv()).unwrap();
        }
        assert_eq!(snapshot.pose, target);
    }

    #[test]
    fn test_out_of_envelope_position_is_clamped() {
        let (mut engine, handle) = engine();
        let outcome = run_command(&mut engine, &handle, Command::SetPosition(Pose::new(9.0, 0.0, -9.0)));
        assert_eq!(assert_ok!(outcome).target, Pose::new(5.0, 1.0, -5.0));
    }

    #[test]
    fn test_speaker_mode_follows_detections() {
        let (mut engine, handle) = engine();
        let mut events = handle.subscribe_events();

        let frame = || vec![person_at(320.0, 0.9, false), person_at(960.0, 0.4, true)];
        for _ in 0..2 {
            assert!(handle.submit_detections(frame()));
            engine.tick();
        }
        assert!(engine.repository.subjects().is_empty());

        assert!(handle.submit_detections(frame()));
        run_command(&mut engine, &handle, Command::SetMode(Mode::Speaker)).unwrap();

        let expected = Pose::new((960.0 / 1280.0 - 0.5) * 6.0, 2.5, -2.0);
        assert_eq!(engine.state().target, expected);

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(seen.contains(&EngineEvent::SubjectAcquired { id: 1 }));
        assert!(seen.contains(&EngineEvent::SubjectAcquired { id: 2 }));
        assert!(seen.contains(&EngineEvent::ModeChanged {
            from: Mode::Manual,
            to: Mode::Speaker
        }));
    }

    #[test]
    fn test_single_frame_false_positive_does_not_move_camera() {
        let (mut engine, handle) = engine();
        run_command(&mut engine, &handle, Command::SetMode(Mode::Speaker)).unwrap();
        let held = engine.state().target;

        assert!(handle.submit_detections(vec![person_at(1100.0, 0.3, false)]));
        for _ in 0..5 {
            engine.tick();
            assert_eq!(engine.state().target, held);
        }
        assert!(handle.latest().unwrap().subjects.is_empty());
    }

    #[test]
    fn test_stalled_feed_evicts_subjects() {
        let (mut engine, handle) = engine();
        let mut events = handle.subscribe_events();

        for _ in 0..3 {
            assert!(handle.submit_detections(vec![person_at(960.0, 0.8, true)]));
            engine.tick();
        }
        run_command(&mut engine, &handle, Command::SetMode(Mode::Speaker)).unwrap();
        assert_eq!(engine.repository.subjects().len(), 1);

        // the mode tick above was the first silent one; 30 frames is the grace
        for _ in 0..29 {
            engine.tick();
        }
        assert_eq!(engine.repository.subjects().len(), 1);

        engine.tick();
        assert!(engine.repository.subjects().is_empty());
        assert!(handle.latest().unwrap().subjects.is_empty());

        let mut lost = false;
        while let Ok(event) = events.try_recv() {
            lost |= event == EngineEvent::SubjectLost { id: 1 };
        }
        assert!(lost);

        // with nobody left, Speaker holds its last target
        let held = engine.state().target;
        for _ in 0..10 {
            engine.tick();
            assert_eq!(engine.state().target, held);
        }
    }

    #[test]
    fn test_tick_fault_leaves_state_unchanged() {
        let (mut engine, handle) = engine();
        run_command(&mut engine, &handle, Command::SetMode(Mode::Wide)).unwrap();
        for _ in 0..5 {
            engine.tick();
        }
        let before = engine.state().clone();

        let rx = assert_ok!(handle.submit(Command::SetMode(Mode::Manual)));
        engine.fault_next_tick = true;
        engine.tick();

        assert_eq!(engine.faults, 1);
        assert_eq!(engine.state(), &before);
        assert_eq!(engine.state().mode(), Mode::Wide);
        assert_eq!(
            block_on(rx).unwrap_or(Err(CommandError::Aborted)),
            Err(CommandError::Aborted)
        );

        engine.tick();
        assert_eq!(engine.state().tick, before.tick + 1);
        assert_ne!(engine.state().pose, before.pose);
        assert_eq!(handle.latest().unwrap().faults, 1);
    }

    #[test]
    fn test_full_detection_inbox_drops_new_frame() {
        let mut config = Config::default();
        config.tracking.inbox_capacity = 2;
        let (mut engine, handle) = Engine::new(&config);

        assert!(handle.submit_detections(vec![person_at(320.0, 0.9, false)]));
        assert!(handle.submit_detections(vec![person_at(330.0, 0.9, false)]));
        assert!(!handle.submit_detections(vec![person_at(340.0, 0.9, false)]));

        engine.tick();
        let tracking = handle.latest().unwrap().tracking;
        assert_eq!(tracking.frames, 2);
        assert_eq!(engine.repository.get(1).map(|s| s.center.x), Some(330.0));
    }

    #[test]
    fn test_full_command_inbox_reports_busy() {
        let mut config = Config::default();
        config.motion.command_capacity = 1;
        let (mut engine, handle) = Engine::new(&config);

        let first = assert_ok!(handle.submit(Command::SetMode(Mode::Wide)));
        let second = handle.submit(Command::SetMode(Mode::Group));
        assert_eq!(assert_err!(second), CommandError::Busy);

        engine.tick();
        assert_eq!(assert_ok!(block_on(first).unwrap()).mode.to, Mode::Wide);
    }

    #[test]
    fn test_group_without_subjects_holds_target() {
        let (mut engine, handle) = engine();
        run_command(&mut engine, &handle, Command::SetMode(Mode::Wide)).unwrap();
        run_command(&mut engine, &handle, Command::SetMode(Mode::Group)).unwrap();

        let held = engine.state().target;
        for _ in 0..10 {
            engine.tick();
            assert_eq!(engine.state().target, held);
        }
    }

    #[test]
    fn test_actuator_counts_movements() {
        let (mut engine, handle) = engine();
        let actuator = engine.actuator();
        run_command(&mut engine, &handle, Command::SetPosition(Pose::new(1.0, 2.5, 0.0))).unwrap();
        for _ in 0..90 {
            engine.tick();
        }

        assert!(engine.state().movements > 0);
        let last = actuator.borrow().clone().unwrap();
        assert!(last.pose.distance(&engine.state().pose) <= 0.01);
    }

    #[test]
    fn test_broadcast_cadence() {
        let mut config = Config::default();
        config.broadcast.every_ticks = 3;
        let (mut engine, handle) = Engine::new(&config);
        let mut subscription = handle.subscribe();

        for _ in 0..6 {
            engine.tick();
        }

        assert_eq!(block_on(subscription.recv()).map(|s| s.tick), Some(3));
        assert_eq!(block_on(subscription.recv()).map(|s| s.tick), Some(6));
    }

    #[tokio::test]
    async fn test_run_stops_and_closes_subscribers() {
        let (engine, handle) = engine();
        let mut subscription = handle.subscribe();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task = tokio::spawn(engine.run(shutdown_rx));

        let change = handle.set_mode(Mode::Wide).await.unwrap();
        assert_eq!(change.to, Mode::Wide);
        assert!(subscription.recv().await.is_some());

        shutdown_tx.send(()).unwrap();
        let state = task.await.unwrap();
        assert_eq!(state.mode(), Mode::Wide);

        while subscription.recv().await.is_some() {}
        assert_eq!(handle.set_mode(Mode::Manual).await, Err(CommandError::EngineStopped));
    }
}
