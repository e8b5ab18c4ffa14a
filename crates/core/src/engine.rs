// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 XENONnT Collaboration

//! The reconciliation engine: the control loop that drives the fleet toward
//! the operator's goal state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::command::{Command, CommandId, CommandRecord, CooldownState};
use crate::config::EngineConfig;
use crate::detector::Detector;
use crate::error_reporter::{ErrorKind, ErrorThrottle, Priority};
use crate::goal::{parse_goals, Goal};
use crate::linkage::{self, LinkGroup};
use crate::ports::{
    AggregateSink, CommandSink, ErrorSink, GoalSource, ModeSource, PortError, RunRecorder, Sleeper,
    StatusSource,
};
use crate::run::{OutputLocation, RunComment, RunDocument};
use crate::status::{aggregate_status, AggregateStatus, Status};

/// Per-tick scratch state. Constructed fresh at the top of every [`tick`],
/// never process-wide — this is what keeps invariant I1 (at most one `start`
/// per tick) true without global mutability.
struct Tick {
    now_ms: u64,
    has_started_run_this_loop: bool,
}

/// The reconciliation engine. Owns per-(detector, command) cooldown state
/// and the error-emission throttle across ticks; everything else it needs is
/// reached through the port traits passed in at construction.
pub struct ReconciliationEngine<C: Clock> {
    clock: C,
    config: EngineConfig,
    status_source: Arc<dyn StatusSource>,
    goal_source: Arc<dyn GoalSource>,
    mode_source: Arc<dyn ModeSource>,
    command_sink: Arc<dyn CommandSink>,
    run_recorder: Arc<dyn RunRecorder>,
    aggregate_sink: Arc<dyn AggregateSink>,
    error_sink: Arc<dyn ErrorSink>,
    sleeper: Arc<dyn Sleeper>,
    cooldown: CooldownState,
    throttle: ErrorThrottle,
    next_command_id: CommandId,
}

impl<C: Clock> ReconciliationEngine<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clock: C,
        config: EngineConfig,
        status_source: Arc<dyn StatusSource>,
        goal_source: Arc<dyn GoalSource>,
        mode_source: Arc<dyn ModeSource>,
        command_sink: Arc<dyn CommandSink>,
        run_recorder: Arc<dyn RunRecorder>,
        aggregate_sink: Arc<dyn AggregateSink>,
        error_sink: Arc<dyn ErrorSink>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        ReconciliationEngine {
            clock,
            config,
            status_source,
            goal_source,
            mode_source,
            command_sink,
            run_recorder,
            aggregate_sink,
            error_sink,
            sleeper,
            cooldown: CooldownState::new(),
            throttle: ErrorThrottle::default_daq(),
            next_command_id: 0,
        }
    }

    /// Expose cooldown state for tests that want to assert on it directly.
    #[cfg(any(test, feature = "test-support"))]
    pub fn cooldown(&self) -> &CooldownState {
        &self.cooldown
    }

    /// The id the next issued command will be assigned. Ids are handed out
    /// sequentially starting from 0, so a test that calls this before `tick`
    /// can predict which id a command issued during that tick will carry.
    #[cfg(any(test, feature = "test-support"))]
    pub fn next_command_id(&self) -> CommandId {
        self.next_command_id
    }

    /// One full evaluation of the fleet. Never propagates a collaborator
    /// fault out to the caller: faults are logged and the affected operation
    /// becomes a no-op for this tick.
    pub async fn tick(&mut self) {
        let mut tick = Tick {
            now_ms: self.clock.epoch_ms(),
            has_started_run_this_loop: false,
        };

        let raw_goals = match self.goal_source.raw_goals().await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "goal source failed; skipping tick");
                return;
            }
        };
        let Some(goals) = parse_goals(&raw_goals, &self.config.control_keys) else {
            debug!("goal state incomplete; skipping tick");
            return;
        };

        let mut aggs = HashMap::new();
        for detector in Detector::ALL {
            match self.compute_aggregate(detector).await {
                Ok(agg) => {
                    if let Err(e) = self.aggregate_sink.publish(detector, &agg).await {
                        warn!(error = %e, %detector, "failed to publish aggregate status");
                    }
                    if agg.status == Status::Idle {
                        self.cooldown.observe_idle(detector);
                    }
                    aggs.insert(detector, agg);
                }
                Err(e) => {
                    warn!(error = %e, %detector, "status source failed; skipping detector this tick");
                }
            }
        }

        let tpc_goal = &goals[&Detector::Tpc];
        let linkage = linkage::resolve_linkage(tpc_goal.link_mv, tpc_goal.link_nv);

        for group in &linkage {
            let Some(agg) = aggs.get(&group.leader) else {
                continue;
            };
            let goal = &goals[&group.leader];
            if let Err(e) = self
                .evaluate_group(&mut tick, group, goal, agg, &aggs, &linkage)
                .await
            {
                warn!(error = %e, detector = %group.leader, "collaborator fault during evaluation");
            }
        }
    }

    async fn compute_aggregate(&self, detector: Detector) -> Result<AggregateStatus, PortError> {
        let reports = self.status_source.latest_reports(detector).await?;
        let now_ms = self.clock.epoch_ms();
        let prelim = aggregate_status(&reports, now_ms, self.config.client_timeout_ms, None);
        if prelim.mode == "none" {
            return Ok(prelim);
        }
        let (readers, cc) = self.mode_source.hosts_for_mode(&prelim.mode).await?;
        let relevant: HashSet<String> = readers.into_iter().chain(cc).collect();
        Ok(aggregate_status(
            &reports,
            now_ms,
            self.config.client_timeout_ms,
            Some(&relevant),
        ))
    }

    /// Evaluate one link group's ladder.
    async fn evaluate_group(
        &mut self,
        tick: &mut Tick,
        group: &LinkGroup,
        goal: &Goal,
        agg: &AggregateStatus,
        aggs: &HashMap<Detector, AggregateStatus>,
        linkage: &[LinkGroup],
    ) -> Result<(), PortError> {
        let d = group.leader;

        if !goal.active {
            let any_active = agg.status.is_active()
                || group
                    .peers()
                    .filter_map(|p| aggs.get(&p))
                    .any(|a| a.status.is_active());
            if any_active {
                self.stop_gently(tick, d, goal, agg, linkage).await?;
            } else if agg.status == Status::Timeout {
                self.timeout_check(tick, d, None, goal, linkage).await?;
            }
            return Ok(());
        }

        let peers_in = |status: Status| {
            group
                .peers()
                .all(|p| aggs.get(&p).map(|a| a.status == status).unwrap_or(true))
        };

        if agg.status == Status::Running && peers_in(Status::Running) {
            self.check_run_turnover(tick, d, goal, agg, linkage).await
        } else if agg.status == Status::Armed && peers_in(Status::Armed) {
            self.issue_command(tick, d, Command::Start, goal, false, linkage).await
        } else if agg.status == Status::Idle && peers_in(Status::Idle) {
            self.issue_command(tick, d, Command::Arm, goal, false, linkage).await
        } else if agg.status == Status::Arming && peers_in(Status::Arming) {
            self.timeout_check(tick, d, Some(Command::Arm), goal, linkage).await
        } else if agg.status == Status::Error && peers_in(Status::Error) {
            let force = self.cooldown.can_force_stop(d);
            self.issue_command(tick, d, Command::Stop, goal, force, linkage).await?;
            self.cooldown.set_can_force_stop(d, false);
            Ok(())
        } else {
            self.timeout_check(tick, d, None, goal, linkage).await
        }
    }

    async fn stop_gently(
        &mut self,
        tick: &mut Tick,
        d: Detector,
        goal: &Goal,
        agg: &AggregateStatus,
        linkage: &[LinkGroup],
    ) -> Result<(), PortError> {
        if agg.status == Status::Running && goal.finish_run_on_stop {
            self.check_run_turnover(tick, d, goal, agg, linkage).await
        } else {
            self.issue_command(tick, d, Command::Stop, goal, false, linkage).await
        }
    }

    async fn check_run_turnover(
        &mut self,
        tick: &mut Tick,
        d: Detector,
        goal: &Goal,
        agg: &AggregateStatus,
        linkage: &[LinkGroup],
    ) -> Result<(), PortError> {
        let Some(stop_after_min) = goal.stop_after else {
            return Ok(());
        };
        if agg.number < 0 {
            self.emit_error(
                ErrorKind::General,
                format!("run number unavailable for {d} during turnover check"),
                Priority::Warning,
            )
            .await;
            return Ok(());
        }
        let Some(start_ms) = self.run_recorder.run_start_ms(agg.number).await? else {
            return Ok(());
        };
        let elapsed_ms = tick.now_ms.saturating_sub(start_ms);
        if elapsed_ms > stop_after_min as u64 * 60_000 {
            self.issue_command(tick, d, Command::Stop, goal, false, linkage).await?;
        }
        Ok(())
    }

    async fn timeout_check(
        &mut self,
        tick: &mut Tick,
        d: Detector,
        command: Option<Command>,
        goal: &Goal,
        linkage: &[LinkGroup],
    ) -> Result<(), PortError> {
        let c = match command {
            Some(c) => c,
            None => match self.most_recent_command(d) {
                Some(c) => c,
                None => return Ok(()),
            },
        };
        let Some(last_ms) = self.cooldown.last_command_ms(d, c) else {
            return Ok(());
        };
        let dt = tick.now_ms.saturating_sub(last_ms);
        let effective_timeout = if c == Command::Stop {
            self.config.stop_timeout_ms * (self.cooldown.error_stop_count(d) as u64 + 1)
        } else {
            self.config.timeout_for(c)
        };
        if dt < effective_timeout {
            return Ok(());
        }

        if c == Command::Stop {
            if self.cooldown.error_stop_count(d) >= self.config.retry_reset {
                self.emit_error(
                    ErrorKind::StopTimeout,
                    format!("{d} failed to stop after {} retries", self.config.retry_reset),
                    Priority::Error,
                )
                .await;
                self.cooldown.reset_error_stop_count(d);
            } else {
                self.issue_command(tick, d, Command::Stop, goal, false, linkage).await?;
                // Incremented strictly after issuing the retry, so the next
                // attempt's effective timeout already reflects the back-off
                //.
                self.cooldown.increment_error_stop_count(d);
            }
        } else {
            let kind = if c == Command::Arm {
                ErrorKind::ArmTimeout
            } else {
                ErrorKind::StartTimeout
            };
            self.emit_error(kind, format!("{d} {c} timed out"), Priority::Error).await;
            self.issue_command(tick, d, Command::Stop, goal, false, linkage).await?;
        }
        Ok(())
    }

    fn most_recent_command(&self, d: Detector) -> Option<Command> {
        [Command::Arm, Command::Start, Command::Stop]
            .into_iter()
            .filter_map(|c| self.cooldown.last_command_ms(d, c).map(|ts| (ts, c)))
            .max_by_key(|(ts, _)| *ts)
            .map(|(_, c)| c)
    }

    /// The command-rate gate and issuance path.
    async fn issue_command(
        &mut self,
        tick: &mut Tick,
        d: Detector,
        c: Command,
        goal: &Goal,
        force: bool,
        linkage: &[LinkGroup],
    ) -> Result<(), PortError> {
        if c == Command::Start {
            if tick.has_started_run_this_loop {
                debug!(%d, "start already issued this tick; dropping");
                return Ok(());
            }
            tick.has_started_run_this_loop = true;
        }

        let now_ms = tick.now_ms;
        let timeout_c = self.config.timeout_for(c);
        let dt_c = match self.cooldown.last_command_ms(d, c) {
            Some(last) => now_ms.saturating_sub(last),
            None => 2 * timeout_c,
        };
        let mut allowed = dt_c > timeout_c;

        if c == Command::Start {
            let dt_arm = match self.cooldown.last_command_ms(d, Command::Arm) {
                Some(last) => now_ms.saturating_sub(last),
                None => 2 * self.config.time_between_commands_ms,
            };
            allowed = allowed && dt_arm > self.config.time_between_commands_ms;
        }
        if c == Command::Arm {
            let dt_stop = match self.cooldown.last_command_ms(d, Command::Stop) {
                Some(last) => now_ms.saturating_sub(last),
                None => 2 * self.config.time_between_commands_ms,
            };
            allowed = allowed && dt_stop > self.config.time_between_commands_ms;
        }

        if !allowed && !force {
            debug!(%d, %c, "command rate-gated; dropping");
            return Ok(());
        }

        let (readers, cc) = match c {
            Command::Arm | Command::Start => self.mode_source.hosts_for_mode(&goal.mode).await?,
            Command::Stop => self.linked_hosts(linkage, d).await?,
        };

        let id = self.next_command_id;
        self.next_command_id += 1;

        // A non-forced stop stays on its usual stagger: readers become
        // visible immediately, CC hosts only after the drain delay, so the
        // CC never cuts off readers still flushing. Both records share `id`
        // so an ack on either side resolves this one issuance.
        if c == Command::Stop && !force && !cc.is_empty() {
            let reader_record =
                CommandRecord::new(id, c, goal.user.clone(), d, goal.mode.clone(), readers, now_ms);
            let cc_record = CommandRecord::new(id, c, goal.user.clone(), d, goal.mode.clone(), cc, now_ms);
            if let Err(e) = self.command_sink.enqueue(reader_record, 0).await {
                warn!(error = %e, %d, %c, "enqueue failed; no state mutated this tick");
                return Ok(());
            }
            if let Err(e) = self.command_sink.enqueue(cc_record, 5_000).await {
                warn!(error = %e, %d, %c, "cc-host enqueue failed after readers were queued");
                return Ok(());
            }
        } else {
            let hosts: Vec<String> = readers.into_iter().chain(cc).collect();
            let record = CommandRecord::new(id, c, goal.user.clone(), d, goal.mode.clone(), hosts, now_ms);
            if let Err(e) = self.command_sink.enqueue(record, 0).await {
                warn!(error = %e, %d, %c, "enqueue failed; no state mutated this tick");
                return Ok(());
            }
        }

        info!(%d, %c, force, "command issued");
        self.cooldown.record_command(d, c, now_ms);

        if c == Command::Start {
            self.record_run_start(tick, d, goal, linkage, id).await;
        }
        if c == Command::Stop {
            let current_number = self.current_run_number(d).await;
            if let Some(number) = current_number {
                self.record_run_stop(tick, d, number, force, linkage, id).await;
            }
        }
        Ok(())
    }

    async fn linked_hosts(
        &self,
        linkage: &[LinkGroup],
        d: Detector,
    ) -> Result<(Vec<String>, Vec<String>), PortError> {
        let group = linkage::group_of(linkage, d);
        let mut readers = Vec::new();
        let mut cc = Vec::new();
        for member in &group.members {
            let (r, c) = self.mode_source.configured_nodes(*member).await?;
            readers.extend(r);
            cc.extend(c);
        }
        Ok((readers, cc))
    }

    async fn current_run_number(&self, d: Detector) -> Option<i64> {
        self.compute_aggregate(d).await.ok().map(|a| a.number).filter(|n| *n >= 0)
    }

    async fn poll_ack(&self, id: CommandId, attempts: u32) -> Option<u64> {
        for _ in 0..attempts {
            if let Ok(Some(ts)) = self.command_sink.ack_time_ms(id).await {
                return Some(ts);
            }
            self.sleeper.sleep_ms(250).await;
        }
        None
    }

    async fn record_run_start(
        &mut self,
        tick: &Tick,
        d: Detector,
        goal: &Goal,
        linkage: &[LinkGroup],
        id: CommandId,
    ) {
        let number = match self.run_recorder.next_run_number().await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, %d, "failed to allocate run number");
                return;
            }
        };
        let detectors = linkage::group_of(linkage, d).members.clone();

        // Bounded polling for the CC's start acknowledgement (~2s total),
        // falling back to the "messy" tag on miss.
        let (start_ms, messy) = match self.poll_ack(id, 8).await {
            Some(ts) => (ts, false),
            None => (tick.now_ms.saturating_sub(2_000), true),
        };

        let daq_config = self
            .mode_source
            .resolve_mode(&goal.mode)
            .await
            .unwrap_or(serde_json::Value::Null);
        let source = daq_config
            .get("source")
            .and_then(|v| v.get("type"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let data = daq_config
            .get("strax_output_path")
            .and_then(|v| v.as_str())
            .map(|path| OutputLocation {
                kind: "live".to_string(),
                host: "daq".to_string(),
                location: path.to_string(),
            });
        let comment = goal.comment.clone().map(|comment| RunComment {
            user: goal.user.clone(),
            date_ms: start_ms,
            comment,
        });

        let mut run = RunDocument::open(
            number,
            detectors,
            goal.user.clone(),
            goal.mode.clone(),
            daq_config,
            source,
            data,
            comment,
            start_ms,
        );
        if messy {
            run.push_messy_tag();
        }

        if let Err(e) = self.run_recorder.insert_run(run).await {
            warn!(error = %e, %d, number, "failed to insert run document");
        }
    }

    async fn record_run_stop(
        &mut self,
        tick: &Tick,
        d: Detector,
        number: i64,
        forced: bool,
        linkage: &[LinkGroup],
        id: CommandId,
    ) {
        let detectors = linkage::group_of(linkage, d).members.clone();

        // Bounded polling for the CC's stop acknowledgement (~0.5s total).
        let (end_ms, messy) = match self.poll_ack(id, 2).await {
            Some(ts) => (ts, false),
            None => (tick.now_ms.saturating_sub(1_000), true),
        };

        match self
            .run_recorder
            .close_run(number, &detectors, end_ms, messy || forced)
            .await
        {
            Ok(true) => {
                if let Err(e) = self.run_recorder.finalize_rates(number, d).await {
                    warn!(error = %e, %d, number, "failed to finalize run rate stats");
                }
            }
            Ok(false) => {
                debug!(%d, number, "run already sealed; no-op");
            }
            Err(e) => {
                warn!(error = %e, %d, number, "failed to close run document");
            }
        }
    }

    async fn emit_error(&mut self, kind: ErrorKind, message: String, priority: Priority) {
        let now_ms = self.clock.epoch_ms();
        if !self.throttle.should_emit(kind, now_ms) {
            return;
        }
        match self.error_sink.log(&message, priority, Some(kind)).await {
            Ok(()) => self.throttle.record_emitted(kind, now_ms),
            Err(e) => warn!(error = %e, %kind, "error sink failed"),
        }
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
