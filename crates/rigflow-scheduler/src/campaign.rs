//! Campaign — the scheduling state machine and its tick loop.
//!
//! One `Campaign` owns all live state for one software version under test.
//! Each tick runs, in order: completion sweep, assignment sweep, submission,
//! start sweep, checkpoint. Completion runs before assignment so an agent
//! freed this tick is eligible again in the same tick, and the checkpoint is
//! written only after all in-tick mutations, so it is always a consistent
//! end-of-tick snapshot.

use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use rigflow_registry::Registry;
use rigflow_state::{
    CampaignState, CheckpointStore, JobHandle, PlatformStatus, StatusBuckets, StatusCounts,
};

use crate::assign::{Assignment, first_fit};
use crate::backend::{JobBackend, ScriptSource, SubmitRequest};
use crate::error::SchedulerResult;

/// Retries permitted after the initial attempt: a platform gets at most
/// four attempts in total before it blocks.
pub const MAX_RETRIES: u32 = 3;

/// Pacing and policy knobs for the campaign loop.
#[derive(Debug, Clone)]
pub struct CampaignOptions {
    /// Sleep between ticks.
    pub tick_interval: Duration,
    /// Minimum gap between "no progress" log lines.
    pub log_throttle: Duration,
    /// Failed attempts allowed before a platform blocks.
    pub max_retries: u32,
}

impl Default for CampaignOptions {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(10),
            log_throttle: Duration::from_secs(15 * 60),
            max_retries: MAX_RETRIES,
        }
    }
}

/// What one tick did. Empty vectors all around means nothing changed and no
/// checkpoint was needed.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// Platforms whose jobs finished this tick, with success flag.
    pub finished: Vec<(String, bool)>,
    /// Fresh platform → agent pairings.
    pub assigned: Vec<Assignment>,
    /// Platforms whose job submission was accepted.
    pub submitted: Vec<String>,
    /// Platforms rolled back to the queue after a failed submission.
    pub deferred: Vec<String>,
    /// Platforms confirmed started by the backend.
    pub started: Vec<String>,
    /// Failed platforms re-queued by the retry policy.
    pub requeued: Vec<String>,
    /// Failed platforms that exhausted their retries.
    pub blocked: Vec<String>,
    /// Whether a checkpoint was written at the end of the tick.
    pub checkpointed: bool,
}

impl TickReport {
    /// Did any state transition happen this tick?
    pub fn changed(&self) -> bool {
        !(self.finished.is_empty()
            && self.assigned.is_empty()
            && self.submitted.is_empty()
            && self.deferred.is_empty()
            && self.started.is_empty()
            && self.blocked.is_empty())
    }
}

/// The campaign context: registry, live state, and collaborators.
///
/// All mutation happens inside this object's own methods on a single
/// cooperative loop; there is no shared mutable state and no global
/// instance, so independent campaigns can coexist in one process.
pub struct Campaign<B, S> {
    registry: Registry,
    state: CampaignState,
    store: CheckpointStore,
    backend: B,
    scripts: S,
    opts: CampaignOptions,
    resumed: bool,
    /// Set when a checkpoint write failed and must be retried.
    checkpoint_dirty: bool,
    last_idle_log: Option<Instant>,
}

impl<B: JobBackend, S: ScriptSource> Campaign<B, S> {
    /// Create a campaign for `version`, resuming from its checkpoint if one
    /// exists; otherwise every platform starts queued.
    pub fn new(
        version: &str,
        registry: Registry,
        store: CheckpointStore,
        backend: B,
        scripts: S,
        opts: CampaignOptions,
    ) -> SchedulerResult<Self> {
        let (state, resumed) = match store.load(version)? {
            Some(state) => {
                info!(%version, "resuming campaign from checkpoint");
                (state, true)
            }
            None => {
                debug!(%version, "no checkpoint for this version, starting fresh");
                (CampaignState::fresh(version, &registry), false)
            }
        };
        Ok(Self {
            registry,
            state,
            store,
            backend,
            scripts,
            opts,
            resumed,
            checkpoint_dirty: false,
            last_idle_log: None,
        })
    }

    /// Whether this campaign picked up from a checkpoint.
    pub fn resumed(&self) -> bool {
        self.resumed
    }

    /// The campaign's live state (read-only).
    pub fn state(&self) -> &CampaignState {
        &self.state
    }

    /// Read-only snapshot of platform ids per status, for status reporting.
    pub fn current_state(&self) -> StatusBuckets {
        self.state.buckets()
    }

    /// Drive ticks until every platform is `Done` or `Blocked`.
    pub async fn run(&mut self) -> StatusCounts {
        let counts = self.state.counts();
        info!(
            version = %self.state.version,
            platforms = self.state.platforms.len(),
            pending = counts.queued + counts.configuring + counts.running,
            resumed = self.resumed,
            "campaign starting"
        );

        while !self.state.is_complete() {
            let report = self.tick().await;
            if self.state.is_complete() {
                break;
            }
            if report.changed() {
                self.last_idle_log = None;
            } else {
                self.log_idle();
            }
            tokio::time::sleep(self.opts.tick_interval).await;
        }

        let counts = self.state.counts();
        info!(
            version = %self.state.version,
            done = counts.done,
            blocked = counts.blocked,
            "campaign finished"
        );
        counts
    }

    /// Run one tick: completion, assignment, submission, start, checkpoint.
    pub async fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        self.sweep_completions(&mut report).await;
        self.sweep_assignments(&mut report);
        self.submit_configured(&mut report).await;
        self.sweep_starts(&mut report).await;
        self.checkpoint(&mut report);

        debug_assert!(
            self.state.check_capacity(&self.registry).is_ok(),
            "capacity invariant violated: {:?}",
            self.state.check_capacity(&self.registry)
        );
        report
    }

    /// Step 1: poll every running job; release agents and apply the retry
    /// policy for finished ones.
    async fn sweep_completions(&mut self, report: &mut TickReport) {
        let running: Vec<(String, String, String)> = self
            .state
            .platforms
            .iter()
            .filter(|(_, p)| p.status == PlatformStatus::Running)
            .filter_map(|(id, p)| {
                let handle = p.handle.as_ref()?;
                let run = handle.run.as_ref()?;
                Some((id.clone(), handle.agent_id.clone(), run.run_id.clone()))
            })
            .collect();

        for (platform_id, agent_id, run_id) in running {
            match self.backend.poll_finished(&platform_id, &run_id).await {
                Ok(Some(outcome)) => {
                    self.release_agent(&agent_id);
                    self.apply_outcome(&platform_id, outcome.success, report);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        platform = %platform_id,
                        error = %e,
                        "finish poll failed, will retry next tick"
                    );
                }
            }
        }
    }

    /// Success finishes the platform; failure re-queues it until the retry
    /// budget runs out, then blocks it for good.
    fn apply_outcome(&mut self, platform_id: &str, success: bool, report: &mut TickReport) {
        let max_retries = self.opts.max_retries;
        let Some(progress) = self.state.platforms.get_mut(platform_id) else {
            return;
        };
        progress.handle = None;
        report.finished.push((platform_id.to_string(), success));

        if success {
            progress.status = PlatformStatus::Done;
            info!(platform = %platform_id, "platform test finished");
        } else if progress.retries < max_retries {
            progress.retries += 1;
            progress.status = PlatformStatus::Queued;
            info!(
                platform = %platform_id,
                attempt = progress.retries + 1,
                "platform test failed, requeueing"
            );
            report.requeued.push(platform_id.to_string());
        } else {
            // Counter stays frozen at the maximum.
            progress.status = PlatformStatus::Blocked;
            warn!(
                platform = %platform_id,
                retries = progress.retries,
                "platform test failed with retries exhausted, giving up"
            );
            report.blocked.push(platform_id.to_string());
        }
    }

    /// Step 2: first-fit match queued platforms onto eligible agents.
    fn sweep_assignments(&mut self, report: &mut TickReport) {
        for assignment in first_fit(&self.registry, &self.state) {
            self.state
                .agent_busy
                .insert(assignment.agent_id.clone(), true);
            *self
                .state
                .pool_busy
                .entry(assignment.pool_id.clone())
                .or_insert(0) += 1;
            if let Some(progress) = self.state.platforms.get_mut(&assignment.platform_id) {
                progress.status = PlatformStatus::Configuring;
                progress.handle = Some(JobHandle {
                    platform_id: assignment.platform_id.clone(),
                    agent_id: assignment.agent_id.clone(),
                    token: None,
                    run: None,
                });
            }
            info!(
                platform = %assignment.platform_id,
                agent = %assignment.agent_id,
                "configuring job"
            );
            report.assigned.push(assignment);
        }
    }

    /// Step 3: submit scripts for freshly matched platforms. A transient
    /// backend failure rolls the platform back to the queue so the tick
    /// leaves no half-submitted state behind.
    async fn submit_configured(&mut self, report: &mut TickReport) {
        let pending: Vec<(String, String)> = self
            .state
            .platforms
            .iter()
            .filter(|(_, p)| p.status == PlatformStatus::Configuring)
            .filter_map(|(id, p)| {
                let handle = p.handle.as_ref()?;
                handle
                    .token
                    .is_none()
                    .then(|| (id.clone(), handle.agent_id.clone()))
            })
            .collect();

        for (platform_id, agent_id) in pending {
            let Some(platform) = self.registry.platform(&platform_id) else {
                // Possible after resuming a checkpoint against an edited
                // registry for the same version. The platform can never be
                // matched again, so it must not sit in Configuring forever.
                warn!(
                    platform = %platform_id,
                    "checkpointed platform no longer in the registry, blocking it"
                );
                self.release_agent(&agent_id);
                if let Some(progress) = self.state.platforms.get_mut(&platform_id) {
                    progress.status = PlatformStatus::Blocked;
                    progress.handle = None;
                }
                report.blocked.push(platform_id);
                continue;
            };
            let bundle = self.scripts.bundle(platform);
            let request = SubmitRequest {
                platform_id: &platform_id,
                agent_id: &agent_id,
                script: &bundle.script,
                artifact_patterns: &bundle.artifact_patterns,
            };
            match self.backend.submit(request).await {
                Ok(token) => {
                    if let Some(progress) = self.state.platforms.get_mut(&platform_id) {
                        if let Some(handle) = progress.handle.as_mut() {
                            handle.token = Some(token);
                        }
                    }
                    report.submitted.push(platform_id);
                }
                Err(e) => {
                    warn!(
                        platform = %platform_id,
                        agent = %agent_id,
                        error = %e,
                        "submission failed, platform re-queued"
                    );
                    self.release_agent(&agent_id);
                    if let Some(progress) = self.state.platforms.get_mut(&platform_id) {
                        progress.status = PlatformStatus::Queued;
                        progress.handle = None;
                    }
                    report.deferred.push(platform_id);
                }
            }
        }
    }

    /// Step 4: ask the backend whether submitted jobs have started; record
    /// the run id and URL when they have.
    async fn sweep_starts(&mut self, report: &mut TickReport) {
        let submitted: Vec<(String, String)> = self
            .state
            .platforms
            .iter()
            .filter(|(_, p)| p.status == PlatformStatus::Configuring)
            .filter_map(|(id, p)| {
                let handle = p.handle.as_ref()?;
                let token = handle.token.as_ref()?;
                handle.run.is_none().then(|| (id.clone(), token.clone()))
            })
            .collect();

        for (platform_id, token) in submitted {
            match self.backend.poll_started(&token).await {
                Ok(Some(run)) => {
                    info!(platform = %platform_id, url = %run.url, "platform test running");
                    if let Some(progress) = self.state.platforms.get_mut(&platform_id) {
                        progress.status = PlatformStatus::Running;
                        if let Some(handle) = progress.handle.as_mut() {
                            handle.run = Some(run);
                        }
                    }
                    report.started.push(platform_id);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        platform = %platform_id,
                        error = %e,
                        "start poll failed, will retry next tick"
                    );
                }
            }
        }
    }

    /// Step 5: persist a snapshot if this tick changed anything, or if an
    /// earlier checkpoint write is still owed.
    ///
    /// A crash between a failed write and its retry loses at most one
    /// tick's progress; that risk is accepted and logged, never hidden.
    fn checkpoint(&mut self, report: &mut TickReport) {
        if !report.changed() && !self.checkpoint_dirty {
            return;
        }
        match self.store.save(&self.state) {
            Ok(()) => {
                self.checkpoint_dirty = false;
                report.checkpointed = true;
            }
            Err(e) => {
                error!(
                    version = %self.state.version,
                    error = %e,
                    "checkpoint write failed, keeping in-memory state and retrying next tick"
                );
                self.checkpoint_dirty = true;
            }
        }
    }

    /// Mark an agent idle again and give its capacity back to the pool.
    fn release_agent(&mut self, agent_id: &str) {
        self.state.agent_busy.insert(agent_id.to_string(), false);
        if let Some(pool_id) = self.registry.agent(agent_id).map(|a| a.pool_id.clone()) {
            if let Some(busy) = self.state.pool_busy.get_mut(&pool_id) {
                *busy = busy.saturating_sub(1);
            }
        }
    }

    /// Throttled "nothing happened" line so a saturated or stalled campaign
    /// does not flood the log at tick frequency.
    fn log_idle(&mut self) {
        let due = self
            .last_idle_log
            .is_none_or(|at| at.elapsed() >= self.opts.log_throttle);
        if !due {
            return;
        }
        let counts = self.state.counts();
        info!(
            queued = counts.queued,
            configuring = counts.configuring,
            running = counts.running,
            "campaign made no progress this tick"
        );
        self.last_idle_log = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use rigflow_registry::{
        AgentConfig, BackendAgent, Platform, PlatformConfig, PoolConfig, RegistryConfig,
    };
    use rigflow_state::{PlatformProgress, RunRef};

    use crate::backend::{BackendError, BackendResult, JobOutcome, ScriptBundle};

    // ── Scripted mock backend ──────────────────────────────────────

    #[derive(Default)]
    struct MockInner {
        next_token: u32,
        /// Per platform: how many attempts fail before one succeeds.
        fail_times: HashMap<String, u32>,
        /// Per platform: how many finish polls answer "still running" first.
        finish_delay: HashMap<String, u32>,
        /// Attempt counter per platform (incremented on submit).
        attempts: HashMap<String, u32>,
        /// token → platform.
        token_platform: HashMap<String, String>,
        /// Submission log for assertions: (platform, agent).
        submissions: Vec<(String, String)>,
        /// Next N submit calls fail with `Unavailable`.
        submit_unavailable: u32,
        /// Next N finish polls fail with `Unavailable`.
        finish_unavailable: u32,
    }

    /// Backend double that survives campaign restarts, like a real CI
    /// server would.
    #[derive(Default)]
    struct MockBackend {
        inner: Mutex<MockInner>,
    }

    impl MockBackend {
        fn failing(platform: &str, times: u32) -> Self {
            let backend = Self::default();
            backend
                .inner
                .lock()
                .unwrap()
                .fail_times
                .insert(platform.to_string(), times);
            backend
        }

        fn set_finish_delay(&self, platform: &str, polls: u32) {
            self.inner
                .lock()
                .unwrap()
                .finish_delay
                .insert(platform.to_string(), polls);
        }

        fn set_submit_unavailable(&self, times: u32) {
            self.inner.lock().unwrap().submit_unavailable = times;
        }

        fn set_finish_unavailable(&self, times: u32) {
            self.inner.lock().unwrap().finish_unavailable = times;
        }

        fn attempts(&self, platform: &str) -> u32 {
            self.inner
                .lock()
                .unwrap()
                .attempts
                .get(platform)
                .copied()
                .unwrap_or(0)
        }

        fn submissions(&self) -> Vec<(String, String)> {
            self.inner.lock().unwrap().submissions.clone()
        }
    }

    impl JobBackend for MockBackend {
        async fn submit(&self, req: SubmitRequest<'_>) -> BackendResult<String> {
            let mut inner = self.inner.lock().unwrap();
            if inner.submit_unavailable > 0 {
                inner.submit_unavailable -= 1;
                return Err(BackendError::Unavailable("submit refused".to_string()));
            }
            inner.next_token += 1;
            let token = format!("tok-{}", inner.next_token);
            *inner.attempts.entry(req.platform_id.to_string()).or_insert(0) += 1;
            inner
                .token_platform
                .insert(token.clone(), req.platform_id.to_string());
            inner
                .submissions
                .push((req.platform_id.to_string(), req.agent_id.to_string()));
            Ok(token)
        }

        async fn poll_started(&self, token: &str) -> BackendResult<Option<RunRef>> {
            let inner = self.inner.lock().unwrap();
            match inner.token_platform.get(token) {
                Some(platform) => Ok(Some(RunRef {
                    run_id: format!("run-{token}"),
                    url: format!("https://ci.example/{platform}/{token}"),
                })),
                None => Err(BackendError::Protocol(format!("unknown token {token}"))),
            }
        }

        async fn poll_finished(
            &self,
            platform_id: &str,
            _run_id: &str,
        ) -> BackendResult<Option<JobOutcome>> {
            let mut inner = self.inner.lock().unwrap();
            if inner.finish_unavailable > 0 {
                inner.finish_unavailable -= 1;
                return Err(BackendError::Unavailable("poll refused".to_string()));
            }
            if let Some(delay) = inner.finish_delay.get_mut(platform_id) {
                if *delay > 0 {
                    *delay -= 1;
                    return Ok(None);
                }
            }
            let attempts = inner.attempts.get(platform_id).copied().unwrap_or(0);
            let fail_times = inner.fail_times.get(platform_id).copied().unwrap_or(0);
            Ok(Some(JobOutcome {
                success: attempts > fail_times,
            }))
        }

        async fn known_agents(&self) -> BackendResult<Vec<BackendAgent>> {
            Ok(Vec::new())
        }
    }

    struct TestScripts;

    impl ScriptSource for TestScripts {
        fn bundle(&self, platform: &Platform) -> ScriptBundle {
            ScriptBundle {
                script: format!("run-tests --platform {}", platform.id),
                artifact_patterns: vec!["results/**".to_string()],
            }
        }
    }

    // ── Fixtures ───────────────────────────────────────────────────

    fn agent_cfg(id: &str, labels: &[&str]) -> AgentConfig {
        AgentConfig {
            id: id.to_string(),
            labels: labels.iter().map(|s| s.to_string()).collect(),
            offline: false,
            launch_supported: true,
            temporarily_offline: false,
        }
    }

    fn platform_cfg(id: &str, labels: &[&str]) -> PlatformConfig {
        PlatformConfig {
            id: id.to_string(),
            labels: labels.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Pool `edge` (capacity 1, one arm agent) and pool `cloud`
    /// (capacity 2, two x86 agents); p1 needs arm, p2/p3 need x86.
    fn two_pool_registry() -> Registry {
        let cfg = RegistryConfig {
            pools: vec![
                PoolConfig {
                    id: "edge".to_string(),
                    capacity: 1,
                    agents: vec![agent_cfg("rig-arm", &["arm"])],
                },
                PoolConfig {
                    id: "cloud".to_string(),
                    capacity: 2,
                    agents: vec![agent_cfg("vm-1", &["x86"]), agent_cfg("vm-2", &["x86"])],
                },
            ],
            platforms: vec![
                platform_cfg("p1", &["arm"]),
                platform_cfg("p2", &["x86"]),
                platform_cfg("p3", &["x86"]),
            ],
        };
        Registry::build(&cfg, &[]).unwrap()
    }

    /// One pool, one agent, platforms as given (all needing "arm").
    fn single_agent_registry(platforms: &[&str]) -> Registry {
        let cfg = RegistryConfig {
            pools: vec![PoolConfig {
                id: "edge".to_string(),
                capacity: 1,
                agents: vec![agent_cfg("rig-1", &["arm"])],
            }],
            platforms: platforms.iter().map(|p| platform_cfg(p, &["arm"])).collect(),
        };
        Registry::build(&cfg, &[]).unwrap()
    }

    fn fast_opts() -> CampaignOptions {
        CampaignOptions {
            tick_interval: Duration::ZERO,
            ..CampaignOptions::default()
        }
    }

    fn campaign(
        version: &str,
        registry: Registry,
        store: CheckpointStore,
        backend: MockBackend,
    ) -> Campaign<MockBackend, TestScripts> {
        Campaign::new(version, registry, store, backend, TestScripts, fast_opts()).unwrap()
    }

    fn status_of(c: &Campaign<MockBackend, TestScripts>, platform: &str) -> PlatformStatus {
        c.state().platforms.get(platform).unwrap().status
    }

    // ── Tests ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn both_pools_fill_in_one_tick_without_overflow() {
        let registry = two_pool_registry();
        let store = CheckpointStore::open_in_memory().unwrap();
        let mut c = campaign("v1", registry.clone(), store, MockBackend::default());

        let report = c.tick().await;

        // p1 on the edge agent; p2 and p3 both on cloud agents, same tick.
        let pairs: Vec<(String, String)> = report
            .assigned
            .iter()
            .map(|a| (a.platform_id.clone(), a.agent_id.clone()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("p1".to_string(), "rig-arm".to_string()),
                ("p2".to_string(), "vm-1".to_string()),
                ("p3".to_string(), "vm-2".to_string()),
            ]
        );
        // The instant backend confirms starts within the same tick.
        assert_eq!(status_of(&c, "p1"), PlatformStatus::Running);
        assert_eq!(status_of(&c, "p2"), PlatformStatus::Running);
        assert_eq!(status_of(&c, "p3"), PlatformStatus::Running);
        assert_eq!(c.state().pool_busy.get("edge"), Some(&1));
        assert_eq!(c.state().pool_busy.get("cloud"), Some(&2));
        assert!(c.state().check_capacity(&registry).is_ok());
        assert!(report.checkpointed);
    }

    #[tokio::test]
    async fn run_completes_and_frees_all_agents() {
        let registry = two_pool_registry();
        let store = CheckpointStore::open_in_memory().unwrap();
        let mut c = campaign("v1", registry, store.clone(), MockBackend::default());

        let counts = c.run().await;

        assert_eq!(counts.done, 3);
        assert_eq!(counts.blocked, 0);
        assert!(c.state().is_complete());
        assert!(c.state().pool_busy.values().all(|&b| b == 0));
        assert!(c.state().agent_busy.values().all(|&b| !b));
        // The final checkpoint reflects the terminal state.
        let saved = store.load("v1").unwrap().unwrap();
        assert_eq!(&saved, c.state());
    }

    #[tokio::test]
    async fn four_failed_attempts_block_the_platform() {
        let registry = single_agent_registry(&["p1"]);
        let store = CheckpointStore::open_in_memory().unwrap();
        let backend = MockBackend::failing("p1", u32::MAX);
        let mut c = campaign("v1", registry, store, backend);

        let counts = c.run().await;

        assert_eq!(counts.blocked, 1);
        let progress = c.state().platforms.get("p1").unwrap();
        assert_eq!(progress.status, PlatformStatus::Blocked);
        // Counter frozen at the maximum, initial run plus three retries.
        assert_eq!(progress.retries, MAX_RETRIES);
        assert_eq!(c.backend.attempts("p1"), 4);
    }

    #[tokio::test]
    async fn blocked_platform_is_never_revisited() {
        let registry = single_agent_registry(&["p1"]);
        let store = CheckpointStore::open_in_memory().unwrap();
        let mut c = campaign("v1", registry, store, MockBackend::failing("p1", u32::MAX));

        c.run().await;
        let attempts_before = c.backend.attempts("p1");
        let report = c.tick().await;

        assert!(!report.changed());
        assert_eq!(c.backend.attempts("p1"), attempts_before);
        assert_eq!(status_of(&c, "p1"), PlatformStatus::Blocked);
    }

    #[tokio::test]
    async fn retry_succeeds_within_budget() {
        let registry = single_agent_registry(&["p1"]);
        let store = CheckpointStore::open_in_memory().unwrap();
        let mut c = campaign("v1", registry, store, MockBackend::failing("p1", 2));

        let counts = c.run().await;

        assert_eq!(counts.done, 1);
        let progress = c.state().platforms.get("p1").unwrap();
        assert_eq!(progress.retries, 2);
        assert_eq!(c.backend.attempts("p1"), 3);
    }

    #[tokio::test]
    async fn retry_may_land_on_a_different_agent() {
        // Two eligible agents: after a failure the platform goes back to the
        // queue and first-fit may pick either idle agent again.
        let cfg = RegistryConfig {
            pools: vec![PoolConfig {
                id: "cloud".to_string(),
                capacity: 2,
                agents: vec![agent_cfg("vm-1", &["x86"]), agent_cfg("vm-2", &["x86"])],
            }],
            platforms: vec![platform_cfg("p1", &["x86"])],
        };
        let registry = Registry::build(&cfg, &[]).unwrap();
        let store = CheckpointStore::open_in_memory().unwrap();
        let mut c = campaign("v1", registry, store, MockBackend::failing("p1", 1));

        c.run().await;

        let submissions = c.backend.submissions();
        assert_eq!(submissions.len(), 2);
        // Both attempts went through the queue, not a sticky agent binding.
        assert!(submissions.iter().all(|(p, _)| p == "p1"));
    }

    #[tokio::test]
    async fn unmatchable_platform_stays_queued_without_error() {
        let cfg = RegistryConfig {
            pools: vec![PoolConfig {
                id: "edge".to_string(),
                capacity: 1,
                agents: vec![agent_cfg("rig-1", &["arm"])],
            }],
            platforms: vec![platform_cfg("p1", &["mips"])],
        };
        let registry = Registry::build(&cfg, &[]).unwrap();
        let store = CheckpointStore::open_in_memory().unwrap();
        let mut c = campaign("v1", registry, store.clone(), MockBackend::default());

        for _ in 0..5 {
            let report = c.tick().await;
            assert!(!report.changed());
            assert!(!report.checkpointed);
        }
        assert_eq!(status_of(&c, "p1"), PlatformStatus::Queued);
        assert!(!c.state().is_complete());
        // Nothing ever changed, so nothing was checkpointed.
        assert!(store.load("v1").unwrap().is_none());
    }

    #[tokio::test]
    async fn restart_resumes_exact_checkpoint() {
        let registry = single_agent_registry(&["p1", "p2"]);
        let store = CheckpointStore::open_in_memory().unwrap();
        let backend = MockBackend::default();
        backend.set_finish_delay("p1", 100);

        let mut c = campaign("v1", registry.clone(), store.clone(), backend);
        c.tick().await;
        assert_eq!(status_of(&c, "p1"), PlatformStatus::Running);
        assert_eq!(status_of(&c, "p2"), PlatformStatus::Queued);
        let snapshot = c.state().clone();
        drop(c);

        // "Process restart": a new campaign for the same version resumes
        // exactly, rather than re-deriving state from the registry.
        let c2 = campaign("v1", registry, store, MockBackend::default());
        assert!(c2.resumed());
        assert_eq!(c2.state(), &snapshot);
        assert_eq!(status_of(&c2, "p1"), PlatformStatus::Running);
        assert_eq!(status_of(&c2, "p2"), PlatformStatus::Queued);
    }

    #[tokio::test]
    async fn checkpoint_for_other_version_is_not_picked_up() {
        let registry = single_agent_registry(&["p1"]);
        let store = CheckpointStore::open_in_memory().unwrap();

        let mut c = campaign("v1", registry.clone(), store.clone(), MockBackend::default());
        c.run().await;

        // A new campaign version starts fresh.
        let c2 = campaign("v2", registry, store, MockBackend::default());
        assert!(!c2.resumed());
        assert_eq!(status_of(&c2, "p1"), PlatformStatus::Queued);
    }

    #[tokio::test]
    async fn checkpointed_platform_missing_from_registry_is_blocked() {
        let registry = single_agent_registry(&["p1"]);
        let store = CheckpointStore::open_in_memory().unwrap();

        // A checkpoint written before the registry was edited: "ghost" is
        // mid-configuration and holds the only agent.
        let mut state = CampaignState::fresh("v1", &registry);
        state.platforms.insert(
            "ghost".to_string(),
            PlatformProgress {
                status: PlatformStatus::Configuring,
                retries: 0,
                handle: Some(JobHandle {
                    platform_id: "ghost".to_string(),
                    agent_id: "rig-1".to_string(),
                    token: None,
                    run: None,
                }),
            },
        );
        state.agent_busy.insert("rig-1".to_string(), true);
        state.pool_busy.insert("edge".to_string(), 1);
        store.save(&state).unwrap();

        let mut c = campaign("v1", registry, store, MockBackend::default());
        assert!(c.resumed());

        let report = c.tick().await;
        assert_eq!(report.blocked, vec!["ghost"]);
        assert_eq!(status_of(&c, "ghost"), PlatformStatus::Blocked);
        // Blocking alone is a state change and must be checkpointed.
        assert!(report.checkpointed);

        // The agent it held is free again and serves the surviving platform.
        let counts = c.run().await;
        assert_eq!(counts.done, 1);
        assert_eq!(counts.blocked, 1);
    }

    #[tokio::test]
    async fn interrupted_and_uninterrupted_runs_reach_same_terminal_state() {
        let make_backend = || {
            let backend = MockBackend::default();
            {
                let mut inner = backend.inner.lock().unwrap();
                inner.fail_times.insert("p2".to_string(), 1);
                inner.fail_times.insert("p3".to_string(), u32::MAX);
            }
            backend
        };

        // Uninterrupted reference run.
        let store_a = CheckpointStore::open_in_memory().unwrap();
        let mut reference = campaign("v1", two_pool_registry(), store_a, make_backend());
        reference.run().await;
        let reference_buckets = reference.current_state();

        // Interrupted run: a few ticks, then restart from the checkpoint
        // against the same (external, surviving) backend.
        let store_b = CheckpointStore::open_in_memory().unwrap();
        let backend = make_backend();
        let mut first = Campaign::new(
            "v1",
            two_pool_registry(),
            store_b.clone(),
            backend,
            TestScripts,
            fast_opts(),
        )
        .unwrap();
        first.tick().await;
        first.tick().await;
        let Campaign { backend, .. } = first;

        let mut second = Campaign::new(
            "v1",
            two_pool_registry(),
            store_b,
            backend,
            TestScripts,
            fast_opts(),
        )
        .unwrap();
        assert!(second.resumed());
        second.run().await;

        assert_eq!(second.current_state().done, reference_buckets.done);
        assert_eq!(second.current_state().blocked, reference_buckets.blocked);
    }

    #[tokio::test]
    async fn failed_submission_rolls_back_and_retries_next_tick() {
        let registry = single_agent_registry(&["p1"]);
        let store = CheckpointStore::open_in_memory().unwrap();
        let backend = MockBackend::default();
        backend.set_submit_unavailable(1);
        let mut c = campaign("v1", registry.clone(), store, backend);

        let report = c.tick().await;
        assert_eq!(report.deferred, vec!["p1"]);
        assert_eq!(status_of(&c, "p1"), PlatformStatus::Queued);
        assert_eq!(c.state().pool_busy.get("edge"), Some(&0));
        assert!(c.state().check_capacity(&registry).is_ok());

        let report = c.tick().await;
        assert_eq!(report.submitted, vec!["p1"]);
        assert_eq!(status_of(&c, "p1"), PlatformStatus::Running);
    }

    #[tokio::test]
    async fn unavailable_finish_poll_leaves_state_untouched() {
        let registry = single_agent_registry(&["p1"]);
        let store = CheckpointStore::open_in_memory().unwrap();
        let backend = MockBackend::default();
        backend.set_finish_unavailable(1);
        let mut c = campaign("v1", registry, store, backend);

        c.tick().await;
        assert_eq!(status_of(&c, "p1"), PlatformStatus::Running);

        // Poll fails: still running, agent still held.
        let report = c.tick().await;
        assert!(report.finished.is_empty());
        assert_eq!(status_of(&c, "p1"), PlatformStatus::Running);
        assert_eq!(c.state().pool_busy.get("edge"), Some(&1));

        // Next tick the poll goes through.
        let report = c.tick().await;
        assert_eq!(report.finished, vec![("p1".to_string(), true)]);
        assert_eq!(status_of(&c, "p1"), PlatformStatus::Done);
    }

    #[tokio::test]
    async fn freed_capacity_is_reused_in_the_same_tick() {
        // One agent, two platforms: when p1 finishes, p2 must be assigned
        // within the same tick that freed the agent.
        let registry = single_agent_registry(&["p1", "p2"]);
        let store = CheckpointStore::open_in_memory().unwrap();
        let mut c = campaign("v1", registry, store, MockBackend::default());

        c.tick().await; // p1 running, p2 queued.
        let report = c.tick().await;

        assert!(report.finished.iter().any(|(p, ok)| p == "p1" && *ok));
        assert!(report.assigned.iter().any(|a| a.platform_id == "p2"));
        assert_eq!(status_of(&c, "p2"), PlatformStatus::Running);
    }

    #[tokio::test]
    async fn capacity_invariant_holds_under_saturation_and_retries() {
        let cfg = RegistryConfig {
            pools: vec![PoolConfig {
                id: "cloud".to_string(),
                capacity: 2,
                agents: vec![
                    agent_cfg("vm-1", &["x86"]),
                    agent_cfg("vm-2", &["x86"]),
                    agent_cfg("vm-3", &["x86"]),
                ],
            }],
            platforms: (1..=5)
                .map(|i| platform_cfg(&format!("p{i}"), &["x86"]))
                .collect(),
        };
        let registry = Registry::build(&cfg, &[]).unwrap();
        let store = CheckpointStore::open_in_memory().unwrap();
        let backend = MockBackend::default();
        backend
            .inner
            .lock()
            .unwrap()
            .fail_times
            .insert("p2".to_string(), 2);
        let mut c = campaign("v1", registry.clone(), store, backend);

        let mut ticks = 0;
        while !c.state().is_complete() {
            c.tick().await;
            c.state().check_capacity(&registry).unwrap();
            ticks += 1;
            assert!(ticks < 100, "campaign did not converge");
        }
        assert_eq!(c.state().counts().done, 5);
    }

    #[tokio::test]
    async fn current_state_buckets_track_the_lifecycle() {
        let registry = single_agent_registry(&["p1", "p2"]);
        let store = CheckpointStore::open_in_memory().unwrap();
        let mut c = campaign("v1", registry, store, MockBackend::default());

        let buckets = c.current_state();
        assert_eq!(buckets.queued, vec!["p1", "p2"]);

        c.tick().await;
        let buckets = c.current_state();
        assert_eq!(buckets.running, vec!["p1"]);
        assert_eq!(buckets.queued, vec!["p2"]);

        c.run().await;
        let buckets = c.current_state();
        assert_eq!(buckets.done, vec!["p1", "p2"]);
    }
}
