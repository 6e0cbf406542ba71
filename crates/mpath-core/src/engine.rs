use crate::config::{EngineConfig, ProbeKind};
use crate::constants::{
    LOWER_FDT_TRIGGER, MAX_OUTSTANDING_PROBES, MAX_PLAUSIBLE_RTT, TRANSITIVE_SETTLE,
};
use crate::detector::{failure_state, FailureKind, PeerEvidence};
use crate::elector::{select_prober, ProberCandidate};
use crate::error::{Error, Result};
use crate::group::{GroupState, PhyintGroup};
use crate::history::{ProbeOutcome, ProbeRecord};
use crate::net::{Incoming, InstanceKey, Network, ProbeReply, ProbeRequest};
use crate::phyint::{Phyint, PhyintInstance, PhyintState};
use crate::scheduler::{Jitter, RandomJitter, TickAction};
use crate::state::{GroupHealth, Health, HealthState, InterfaceHealth};
use crate::sys::{EventSink, FlagControl, LinkEvent};
use crate::target::{SlowVerdict, Target, TargetStatus};
use crate::transitive;
use crate::types::{Family, GroupId, InterfaceFlags, PhyintId, ProbeId, Sequence};
use indexmap::IndexMap;
use std::net::IpAddr;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, instrument, warn};

/// The name under which ungrouped interfaces are gathered.
const ANONYMOUS_GROUP: &str = "";

/// Configuration for one interface to be monitored.
#[derive(Debug, Clone, Default)]
pub struct PhyintConfig {
    /// The interface name, as known to the operating system.
    pub name: String,
    /// The group this interface belongs to, if any.
    pub group: Option<String>,
    /// The IPv4 test address, if probing is configured for IPv4.
    pub ipv4_test_addr: Option<IpAddr>,
    /// The IPv6 test address, if probing is configured for IPv6.
    pub ipv6_test_addr: Option<IpAddr>,
    /// Whether the interface is a standby, carrying traffic only on
    /// failover.
    pub standby: bool,
}

/// Group context copied out before mutating interface state.
#[derive(Debug, Clone, Copy)]
struct GroupCtx {
    id: GroupId,
    state: GroupState,
    probe_interval: Duration,
    user_interval: Duration,
    anonymous: bool,
    targets_are_routers: bool,
    has_designated_prober: bool,
}

/// The failure detection engine.
///
/// All interface, group and probing state lives here; the engine is driven
/// entirely by a caller-owned loop through [`Engine::tick`],
/// [`Engine::handle_incoming`] and [`Engine::handle_link_event`], and never
/// blocks.  Timer expiry and packet arrival always return normally, whatever
/// the input.
pub struct Engine<F: FlagControl, E: EventSink> {
    config: EngineConfig,
    phyints: IndexMap<PhyintId, Phyint>,
    groups: IndexMap<GroupId, PhyintGroup>,
    next_phyint_id: usize,
    next_group_id: usize,
    flag_control: F,
    events: E,
    jitter: Box<dyn Jitter + Send>,
    health: Health,
}

impl<F: FlagControl, E: EventSink> std::fmt::Debug for Engine<F, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("phyints", &self.phyints)
            .field("groups", &self.groups)
            .field("next_phyint_id", &self.next_phyint_id)
            .field("next_group_id", &self.next_group_id)
            .field("health", &self.health)
            .finish_non_exhaustive()
    }
}

impl<F: FlagControl, E: EventSink> Engine<F, E> {
    #[must_use]
    pub fn new(config: EngineConfig, flag_control: F, events: E) -> Self {
        Self::with_jitter(config, flag_control, events, Box::new(RandomJitter))
    }

    #[must_use]
    pub fn with_jitter(
        config: EngineConfig,
        flag_control: F,
        events: E,
        jitter: Box<dyn Jitter + Send>,
    ) -> Self {
        Self {
            config,
            phyints: IndexMap::new(),
            groups: IndexMap::new(),
            next_phyint_id: 0,
            next_group_id: 0,
            flag_control,
            events,
            jitter,
            health: Health::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// A handle onto the published health snapshot.
    #[must_use]
    pub fn health(&self) -> Health {
        self.health.clone()
    }

    /// Look up an interface by name.
    #[must_use]
    pub fn phyint_id(&self, name: &str) -> Option<PhyintId> {
        self.phyints
            .values()
            .find(|phyint| phyint.name == name)
            .map(|phyint| phyint.id)
    }

    /// The state of an interface.
    #[must_use]
    pub fn phyint_state(&self, id: PhyintId) -> Option<PhyintState> {
        self.phyints.get(&id).map(|phyint| phyint.state)
    }

    /// The aggregate state of a group.
    #[must_use]
    pub fn group_state(&self, name: &str) -> Option<GroupState> {
        self.groups
            .values()
            .find(|group| group.name == name)
            .map(|group| group.state)
    }

    /// Register an interface discovered by the administrative layer.
    #[instrument(skip(self), level = "trace")]
    pub fn add_phyint(&mut self, config: PhyintConfig, now: Instant) -> Result<PhyintId> {
        if self.phyint_id(&config.name).is_some() {
            return Err(Error::BadConfig(format!(
                "interface {} already registered",
                config.name
            )));
        }
        let group_name = config.group.as_deref().unwrap_or(ANONYMOUS_GROUP);
        let group_id = self.ensure_group(group_name);
        let id = PhyintId(self.next_phyint_id);
        self.next_phyint_id += 1;
        let mut phyint = Phyint::new(id, config.name.clone(), group_id, config.standby, now);
        let mut probe_id_offset = (id.0 as u16).wrapping_mul(2);
        for (family, test_addr) in [
            (Family::Ipv4, config.ipv4_test_addr),
            (Family::Ipv6, config.ipv6_test_addr),
        ] {
            if let Some(addr) = test_addr {
                let probe_id = ProbeId(self.config.probe_id.0.wrapping_add(probe_id_offset));
                let instance = PhyintInstance::new(
                    family,
                    Some(addr),
                    probe_id,
                    self.config.initial_sequence,
                    now,
                );
                match family {
                    Family::Ipv4 => phyint.v4 = Some(instance),
                    Family::Ipv6 => phyint.v6 = Some(instance),
                }
            }
            probe_id_offset = probe_id_offset.wrapping_add(1);
        }
        let has_test_addr = phyint.has_test_addr();
        phyint.state = if has_test_addr {
            PhyintState::NoTargets
        } else {
            PhyintState::Init
        };
        self.phyints.insert(id, phyint);
        if let Some(group) = self.groups.get_mut(&group_id) {
            group.members.push(id);
            group.uses_test_addrs |= has_test_addr;
        }
        if config.standby {
            self.mirror_flags(id, InterfaceFlags::INACTIVE, InterfaceFlags::empty());
        }
        self.reduce_group(group_id);
        self.publish_health();
        Ok(id)
    }

    /// Deregister an interface; its group is destroyed with its last member.
    #[instrument(skip(self), level = "trace")]
    pub fn remove_phyint(&mut self, id: PhyintId) -> Result<()> {
        let phyint = self
            .phyints
            .shift_remove(&id)
            .ok_or_else(|| Error::UnknownInterface(format!("{id}")))?;
        let group_id = phyint.group;
        let emptied = self.groups.get_mut(&group_id).map(|group| {
            group.members.retain(|member| *member != id);
            group.members.is_empty()
        });
        match emptied {
            Some(true) => {
                self.groups.shift_remove(&group_id);
            }
            Some(false) => self.reduce_group(group_id),
            None => {}
        }
        self.publish_health();
        Ok(())
    }

    /// Take an interface administratively offline, or bring it back.
    #[instrument(skip(self), level = "trace")]
    pub fn set_offline(&mut self, id: PhyintId, offline: bool, now: Instant) -> Result<()> {
        let group_id = {
            let phyint = self
                .phyints
                .get_mut(&id)
                .ok_or_else(|| Error::UnknownInterface(format!("{id}")))?;
            if offline {
                for pii in phyint.instances_mut() {
                    pii.schedule.stop();
                    pii.reset_probe_state();
                }
                phyint.local_schedule.stop();
            } else {
                for pii in phyint.instances_mut() {
                    pii.schedule.restart(now);
                }
            }
            phyint.group
        };
        if offline {
            self.set_phyint_state(id, PhyintState::Offline);
            self.mirror_flags(id, InterfaceFlags::OFFLINE, InterfaceFlags::empty());
        } else {
            let has_targets = self.phyints.get(&id).is_some_and(|phyint| {
                phyint.instances().any(|pii| !pii.targets.is_empty())
            });
            let state = if has_targets {
                PhyintState::Running
            } else {
                PhyintState::NoTargets
            };
            self.set_phyint_state(id, state);
            self.mirror_flags(id, InterfaceFlags::empty(), InterfaceFlags::OFFLINE);
        }
        self.reduce_group(group_id);
        self.publish_health();
        Ok(())
    }

    /// Install router targets taken from a routing table scan.
    ///
    /// Router targets survive a group failure, unlike multicast-discovered
    /// host targets; the routing table is assumed to stay valid.
    #[instrument(skip(self, addrs), level = "trace")]
    pub fn set_router_targets(
        &mut self,
        id: PhyintId,
        family: Family,
        addrs: &[IpAddr],
    ) -> Result<()> {
        let group_id = {
            let phyint = self
                .phyints
                .get_mut(&id)
                .ok_or_else(|| Error::UnknownInterface(format!("{id}")))?;
            let group_id = phyint.group;
            let pii = phyint
                .instance_mut(family)
                .ok_or_else(|| Error::BadConfig(format!("no {family} instance on {id}")))?;
            pii.targets.clear();
            for addr in addrs {
                pii.targets.add(*addr);
            }
            group_id
        };
        if let Some(group) = self.groups.get_mut(&group_id) {
            group.targets_are_routers = true;
        }
        self.note_targets_arrived(id);
        self.reduce_group(group_id);
        self.publish_health();
        Ok(())
    }

    /// Register a peer interface as a transitive probe target.
    #[instrument(skip(self), level = "trace")]
    pub fn add_local_target(&mut self, id: PhyintId, peer: PhyintId) -> Result<()> {
        if !self.phyints.contains_key(&peer) {
            return Err(Error::UnknownInterface(format!("{peer}")));
        }
        let phyint = self
            .phyints
            .get_mut(&id)
            .ok_or_else(|| Error::UnknownInterface(format!("{id}")))?;
        let known = phyint
            .local_targets
            .iter()
            .any(|target| target.local_state().is_some_and(|state| state.peer == peer));
        if !known {
            phyint.local_targets.push(Target::local(peer));
        }
        Ok(())
    }

    /// React to a link state edge from the link-event collaborator.
    #[instrument(skip(self), level = "trace")]
    pub fn handle_link_event(&mut self, id: PhyintId, event: LinkEvent, now: Instant) {
        let Some(phyint) = self.phyints.get_mut(&id) else {
            return;
        };
        match event {
            LinkEvent::Up => {
                phyint.record_link_up(now);
                if phyint.state != PhyintState::Offline {
                    for pii in phyint.instances_mut() {
                        pii.reset_probe_state();
                        pii.schedule.restart(now);
                    }
                }
                // Repair is re-evaluated by probing (or link stabilization
                // for interfaces without a test address), not assumed here.
            }
            LinkEvent::Down => {
                phyint.record_link_down();
                for pii in phyint.instances_mut() {
                    pii.reset_probe_state();
                    pii.schedule.stop();
                }
                phyint.local_schedule.stop();
                let group_id = phyint.group;
                if matches!(
                    phyint.state,
                    PhyintState::Running | PhyintState::Init | PhyintState::NoTargets
                ) {
                    phyint.first_failure_at = Some(now);
                    self.fail_phyint(id, now);
                    self.reduce_group(group_id);
                }
            }
        }
        self.publish_health();
    }

    /// The relative delay until the next probe anywhere is due.
    ///
    /// `None` means nothing is scheduled: every interface is offline, link
    /// down, or otherwise quiesced.
    #[must_use]
    pub fn next_timeout(&self, now: Instant) -> Option<Duration> {
        self.phyints
            .values()
            .filter(|phyint| phyint.state != PhyintState::Offline && phyint.link_up)
            .flat_map(|phyint| {
                phyint
                    .instances()
                    .filter_map(|pii| pii.schedule.next_due())
                    .chain(phyint.local_schedule.next_due())
            })
            .min()
            .map(|due| due.saturating_duration_since(now))
    }

    /// Timer entry point: mark timeouts, evaluate failures, send due probes.
    ///
    /// Never fails; send errors are logged and the affected probe is treated
    /// as sent.
    #[instrument(skip_all, level = "trace")]
    pub fn tick<N: Network>(&mut self, network: &mut N, now: Instant, wall: SystemTime) {
        let ids: Vec<PhyintId> = self.phyints.keys().copied().collect();
        for id in ids {
            self.tick_phyint(network, id, now, wall);
        }
        let group_ids: Vec<GroupId> = self.groups.keys().copied().collect();
        for group_id in group_ids {
            self.check_crtt_improved(group_id);
            self.check_prober_trial_window(group_id, now);
        }
        self.publish_health();
    }

    /// Packet entry point.  Malformed or unexpected input never raises.
    #[instrument(skip(self, network), level = "trace")]
    pub fn handle_incoming<N: Network>(
        &mut self,
        network: &mut N,
        incoming: Incoming,
        now: Instant,
    ) {
        match incoming {
            Incoming::Reply(reply) => self.handle_reply(reply, now),
            Incoming::LocalProbe { src, dst, seq } => {
                if self.phyints.contains_key(&dst) {
                    if let Err(err) = network.send_local_ack(dst, src, seq) {
                        debug!(%err, "failed to acknowledge local probe");
                    }
                }
            }
            Incoming::LocalAck { src, dst, seq } => self.handle_local_ack(src, dst, seq, now),
        }
        self.publish_health();
    }

    /// Drive one iteration of tick, receive and dispatch.
    pub fn step<N: Network>(&mut self, network: &mut N) -> Result<()> {
        let now = Instant::now();
        self.tick(network, now, SystemTime::now());
        let wait = self
            .next_timeout(Instant::now())
            .unwrap_or(Duration::from_secs(1))
            .clamp(self.config.read_timeout, Duration::from_secs(1));
        if let Some(incoming) = network.recv(wait)? {
            self.handle_incoming(network, incoming, Instant::now());
        }
        Ok(())
    }

    /// Run the engine on the current thread.
    pub fn run<N: Network>(&mut self, network: &mut N) -> Result<()> {
        loop {
            self.step(network)?;
        }
    }

    fn ensure_group(&mut self, name: &str) -> GroupId {
        if let Some(group) = self.groups.values().find(|group| group.name == name) {
            return group.id;
        }
        let id = GroupId(self.next_group_id);
        self.next_group_id += 1;
        let group = PhyintGroup::new(id, name.to_string(), name == ANONYMOUS_GROUP, &self.config);
        self.groups.insert(id, group);
        id
    }

    fn group_ctx(&self, id: GroupId) -> Option<GroupCtx> {
        self.groups.get(&id).map(|group| GroupCtx {
            id: group.id,
            state: group.state,
            probe_interval: group.probe_interval,
            user_interval: group.user_probe_interval,
            anonymous: group.anonymous,
            targets_are_routers: group.targets_are_routers,
            has_designated_prober: group.has_designated_prober,
        })
    }

    fn tick_phyint<N: Network>(
        &mut self,
        network: &mut N,
        id: PhyintId,
        now: Instant,
        wall: SystemTime,
    ) {
        let Some(phyint) = self.phyints.get(&id) else {
            return;
        };
        if phyint.state == PhyintState::Offline || !phyint.link_up {
            return;
        }
        let Some(gctx) = self.group_ctx(phyint.group) else {
            return;
        };
        // Link-based repair for interfaces that cannot probe over IP.
        if phyint.state == PhyintState::Failed
            && !phyint.has_test_addr()
            && phyint.link_stable(now)
        {
            self.repair_phyint(id, now);
        }
        for family in [Family::Ipv4, Family::Ipv6] {
            self.tick_instance(network, id, family, gctx, now, wall);
        }
        self.tick_local(network, id, gctx, now, wall);
    }

    fn tick_instance<N: Network>(
        &mut self,
        network: &mut N,
        id: PhyintId,
        family: Family,
        gctx: GroupCtx,
        now: Instant,
        wall: SystemTime,
    ) {
        let fail_count = self.config.probe_failure_count;
        let request = {
            let Some(phyint) = self.phyints.get_mut(&id) else {
                return;
            };
            // While a failed group has a designated prober, only the prober
            // keeps sending on the shared address.
            if gctx.state == GroupState::Failed
                && gctx.has_designated_prober
                && !phyint.flags.contains(InterfaceFlags::PROBER)
            {
                return;
            }
            let jitter = &mut *self.jitter;
            let Some(pii) = phyint.instance_mut(family) else {
                return;
            };
            if !pii.can_probe() {
                return;
            }
            mark_instance_timeouts(
                pii,
                now,
                gctx.probe_interval,
                fail_count,
                gctx.targets_are_routers,
            );
            let have_targets = pii.targets.active_count() > 0;
            let action = pii.schedule.tick(
                now,
                gctx.user_interval,
                gctx.probe_interval,
                have_targets,
                jitter,
            );
            match action {
                None => None,
                Some(TickAction::Discover) => Some(ProbeRequest {
                    key: InstanceKey { phyint: id, family },
                    kind: ProbeKind::Multicast,
                    dest: crate::net::all_nodes_addr(family),
                    probe_id: pii.probe_id,
                    seq: Sequence(0),
                    sent: wall,
                }),
                Some(TickAction::Unicast) => pii.targets.next_failure_target().map(|dest| {
                    let seq = pii.snxt;
                    pii.ring
                        .record(ProbeRecord::new(seq, dest, wall, now));
                    pii.snxt = seq.next();
                    pii.stats.sent += 1;
                    ProbeRequest {
                        key: InstanceKey { phyint: id, family },
                        kind: ProbeKind::Unicast,
                        dest,
                        probe_id: pii.probe_id,
                        seq,
                        sent: wall,
                    }
                }),
                Some(TickAction::RttOnly) => pii.targets.next_rtt_target().map(|dest| {
                    ProbeRequest {
                        key: InstanceKey { phyint: id, family },
                        kind: ProbeKind::RttOnly,
                        dest,
                        probe_id: pii.probe_id,
                        seq: Sequence(0),
                        sent: wall,
                    }
                }),
            }
        };
        if let Some(request) = request {
            if let Err(err) = network.send_probe(&request) {
                // Collaborator failure; the probe will time out and the
                // state machine absorbs it like any other loss.
                warn!(%err, "probe send failed");
            }
        }
        self.evaluate_failure(id, now);
    }

    fn tick_local<N: Network>(
        &mut self,
        network: &mut N,
        id: PhyintId,
        gctx: GroupCtx,
        now: Instant,
        wall: SystemTime,
    ) {
        if !self.config.transitive_probing {
            return;
        }
        let prober = self.designated_prober(gctx.id);
        let fail_count = self.config.probe_failure_count;
        let sends = {
            let Some(phyint) = self.phyints.get_mut(&id) else {
                return;
            };
            if phyint.local_targets.is_empty() {
                return;
            }
            if phyint.local_schedule.is_stopped() {
                phyint.local_schedule.restart(now);
            }
            let jitter = &mut *self.jitter;
            for target in &mut phyint.local_targets {
                if let Some(state) = target.local_state_mut() {
                    transitive::mark_local_timeouts(state, now, gctx.probe_interval);
                }
            }
            let action = phyint.local_schedule.tick(
                now,
                gctx.user_interval,
                gctx.user_interval,
                true,
                jitter,
            );
            let mut sends = Vec::new();
            if action == Some(TickAction::Unicast) {
                for target in &mut phyint.local_targets {
                    if let Some(state) = target.local_state_mut() {
                        let seq = transitive::prepare_local_probe(state, now, wall);
                        sends.push((state.peer, seq));
                    }
                }
            }
            sends
        };
        for (peer, seq) in sends {
            if let Err(err) = network.send_local_probe(id, peer, seq) {
                warn!(%err, "local probe send failed");
            }
        }
        // Losing the designated prober means this interface cannot see the
        // one member known to be probing; after a settling period that
        // failure propagates transitively.
        if let Some(prober) = prober {
            if prober == id {
                return;
            }
            let Some(phyint) = self.phyints.get_mut(&id) else {
                return;
            };
            let losses = phyint
                .local_targets
                .iter()
                .find(|target| {
                    target
                        .local_state()
                        .is_some_and(|state| state.peer == prober)
                })
                .map_or(0, transitive::consecutive_local_losses);
            if losses >= fail_count {
                let since = *phyint.prober_unreachable_since.get_or_insert(now);
                if now.saturating_duration_since(since) >= TRANSITIVE_SETTLE
                    && phyint.state == PhyintState::Running
                {
                    phyint.first_failure_at = Some(since);
                    let group_id = phyint.group;
                    self.fail_phyint(id, now);
                    self.reduce_group(group_id);
                }
            } else {
                phyint.prober_unreachable_since = None;
            }
        }
    }

    fn handle_reply(&mut self, reply: ProbeReply, now: Instant) {
        let id = reply.key.phyint;
        let family = reply.key.family;
        let Some(phyint) = self.phyints.get(&id) else {
            return;
        };
        let Some(gctx) = self.group_ctx(phyint.group) else {
            return;
        };
        match reply.kind {
            ProbeKind::RttOnly => self.handle_rtt_reply(id, family, &reply),
            ProbeKind::Multicast => self.handle_discovery_reply(id, family, &reply),
            ProbeKind::Unicast => self.handle_unicast_reply(id, family, &reply, gctx, now),
        }
    }

    fn handle_rtt_reply(&mut self, id: PhyintId, family: Family, reply: &ProbeReply) {
        let Some(pii) = self
            .phyints
            .get_mut(&id)
            .and_then(|phyint| phyint.instance_mut(family))
        else {
            return;
        };
        if !reply.magic_ok {
            pii.stats.unknown += 1;
            return;
        }
        let Some(sample) = plausible_rtt(reply) else {
            return;
        };
        match pii.targets.get_mut(reply.src) {
            Some(target) => {
                target.rtt.record_rtt_only(sample);
            }
            None => pii.stats.unknown += 1,
        }
    }

    fn handle_discovery_reply(&mut self, id: PhyintId, family: Family, reply: &ProbeReply) {
        {
            let Some(pii) = self
                .phyints
                .get_mut(&id)
                .and_then(|phyint| phyint.instance_mut(family))
            else {
                return;
            };
            if !reply.magic_ok {
                pii.stats.unknown += 1;
                return;
            }
        }
        if reply.src.is_unspecified() || self.is_own_test_addr(reply.src) {
            return;
        }
        let Some(gctx) = self
            .phyints
            .get(&id)
            .and_then(|phyint| self.group_ctx(phyint.group))
        else {
            return;
        };
        // The first qualifying responder becomes a target for every member
        // of the group able to probe this family.
        let recipients: Vec<PhyintId> = if gctx.anonymous {
            vec![id]
        } else {
            self.groups
                .get(&gctx.id)
                .map(|group| group.members.clone())
                .unwrap_or_default()
        };
        for member in recipients {
            let added = self
                .phyints
                .get_mut(&member)
                .and_then(|phyint| phyint.instance_mut(family))
                .is_some_and(|pii| pii.can_probe() && pii.targets.add(reply.src));
            if added {
                debug!(%member, src = %reply.src, "discovered probe target");
                self.note_targets_arrived(member);
            }
        }
        self.reduce_group(gctx.id);
    }

    fn handle_unicast_reply(
        &mut self,
        id: PhyintId,
        family: Family,
        reply: &ProbeReply,
        gctx: GroupCtx,
        now: Instant,
    ) {
        let repair_count = self.config.probe_repair_count;
        struct AckOutcome {
            target: IpAddr,
            crtt: Option<Duration>,
            repair_ready: bool,
        }
        let outcome = {
            let Some(phyint) = self.phyints.get_mut(&id) else {
                return;
            };
            let Some(pii) = phyint.instance_mut(family) else {
                return;
            };
            if !reply.magic_ok {
                pii.stats.unknown += 1;
                return;
            }
            if !pii.ring.in_window(pii.snxt, reply.seq) {
                pii.stats.unknown += 1;
                return;
            }
            let sample = plausible_rtt(reply);
            let snxt = pii.snxt;
            let PhyintInstance {
                ring,
                targets,
                stats,
                acks_in_row,
                highest_ack,
                last_lost_target,
                ..
            } = pii;
            let Some(record) = ring.get_mut(reply.seq) else {
                stats.unknown += 1;
                return;
            };
            if record.target != reply.src || record.outcome == ProbeOutcome::Acked {
                stats.unknown += 1;
                return;
            }
            record.outcome = ProbeOutcome::Acked;
            record.acked_at = Some(now);
            stats.acked += 1;
            *acks_in_row += 1;
            *highest_ack = Some(match *highest_ack {
                None => reply.seq,
                Some(prev) if snxt.distance_back(reply.seq) < snxt.distance_back(prev) => reply.seq,
                Some(prev) => prev,
            });
            let mut crtt = None;
            if let Some(target) = targets.get_mut(reply.src) {
                target.acks_in_row += 1;
                target.losses_in_row = 0;
                if let Some(sample) = sample {
                    target.rtt.record_unicast(sample, gctx.probe_interval);
                }
                crtt = target.rtt.crtt();
            }
            let target_repaired = *last_lost_target == Some(reply.src)
                && targets
                    .get(reply.src)
                    .is_some_and(|target| target.acks_in_row >= repair_count);
            let repair_ready = *acks_in_row >= repair_count || target_repaired;
            AckOutcome {
                target: reply.src,
                crtt,
                repair_ready,
            }
        };
        if let Some(phyint) = self.phyints.get_mut(&id) {
            phyint.last_success_at = Some(now);
        }
        if let Some(crtt) = outcome.crtt {
            if crtt > gctx.probe_interval {
                self.handle_slow_target(id, family, outcome.target, crtt, gctx);
            }
        }
        if outcome.repair_ready && self.phyint_state(id) == Some(PhyintState::Failed) {
            self.repair_phyint(id, now);
        }
    }

    /// A target's CRTT has grown past the probe interval: demote it if it is
    /// provably the outlier, otherwise relax the whole group.
    fn handle_slow_target(
        &mut self,
        id: PhyintId,
        family: Family,
        addr: IpAddr,
        crtt: Duration,
        gctx: GroupCtx,
    ) {
        let verdict = {
            let Some(pii) = self
                .phyints
                .get(&id)
                .and_then(|phyint| phyint.instance(family))
            else {
                return;
            };
            pii.targets.judge_slow(addr, gctx.probe_interval)
        };
        match verdict {
            SlowVerdict::Outlier => {
                let Some(pii) = self
                    .phyints
                    .get_mut(&id)
                    .and_then(|phyint| phyint.instance_mut(family))
                else {
                    return;
                };
                if gctx.targets_are_routers {
                    // A slow router stays in the table; routing table scans
                    // will resurrect it if it recovers.
                    if let Some(target) = pii.targets.get_mut(addr) {
                        target.status = TargetStatus::Slow;
                        warn!(%addr, crtt_ms = crtt.as_millis(), "router target marked slow");
                    }
                } else {
                    // A slow host is dropped outright; multicast discovery
                    // replaces it.
                    pii.targets.remove(addr);
                    warn!(%addr, crtt_ms = crtt.as_millis(), "slow host target removed");
                }
            }
            SlowVerdict::GlobalSlowdown => {
                let config = self.config;
                if let Some(group) = self.groups.get_mut(&gctx.id) {
                    group.relax_detection_time(crtt, &config);
                }
            }
        }
    }

    fn handle_local_ack(&mut self, src: PhyintId, dst: PhyintId, seq: Sequence, now: Instant) {
        let repair_count = self.config.probe_repair_count;
        let peer_alive = self
            .phyints
            .get(&src)
            .is_some_and(|peer| peer.state == PhyintState::Running && peer.actively_probing());
        let prober = self
            .phyints
            .get(&dst)
            .and_then(|phyint| self.groups.get(&phyint.group))
            .filter(|group| group.has_designated_prober)
            .map(|group| group.id)
            .and_then(|group_id| self.designated_prober(group_id));
        let (reachable, failed) = {
            let Some(phyint) = self.phyints.get_mut(&dst) else {
                return;
            };
            let Some(target) = phyint.local_targets.iter_mut().find(|target| {
                target
                    .local_state()
                    .is_some_and(|state| state.peer == src)
            }) else {
                return;
            };
            if !transitive::record_local_ack(target, seq, now) {
                return;
            }
            let reachable = transitive::peer_reachable(target, repair_count);
            if prober == Some(src) {
                phyint.prober_unreachable_since = None;
            }
            let down = matches!(phyint.state, PhyintState::Failed | PhyintState::Init);
            (reachable, down)
        };
        // Reaching any peer that is demonstrably probing and healthy proves
        // this interface's link is alive.
        if reachable && peer_alive && failed {
            self.repair_phyint(dst, now);
        }
    }

    /// Check whether an interface has failed, and classify the failure.
    fn evaluate_failure(&mut self, id: PhyintId, now: Instant) {
        let fail_count = self.config.probe_failure_count;
        let (ready, group_id, is_prober, state, first_failure) = {
            let Some(phyint) = self.phyints.get(&id) else {
                return;
            };
            let capable: Vec<&PhyintInstance> = phyint
                .instances()
                .filter(|pii| pii.can_probe() && !pii.targets.is_empty())
                .collect();
            let ready = !capable.is_empty()
                && capable
                    .iter()
                    .all(|pii| pii.consecutive_losses() >= fail_count);
            (
                ready,
                phyint.group,
                phyint.flags.contains(InterfaceFlags::PROBER),
                phyint.state,
                phyint.earliest_failure().unwrap_or(now),
            )
        };
        if !ready {
            return;
        }
        let group_failed = self
            .groups
            .get(&group_id)
            .is_some_and(|group| group.state == GroupState::Failed);
        if is_prober && group_failed {
            // The prober cannot reach its targets either; give the next
            // member a turn.
            self.rotate_prober(group_id, now);
            return;
        }
        if state != PhyintState::Running {
            return;
        }
        let anonymous = self
            .groups
            .get(&group_id)
            .is_some_and(|group| group.anonymous);
        let kind = if anonymous {
            FailureKind::Phyint
        } else {
            let peers: Vec<PeerEvidence> = self
                .phyints
                .values()
                .filter(|peer| peer.group == group_id && peer.id != id)
                .map(|peer| PeerEvidence {
                    link_up: peer.link_up,
                    failed: peer.state == PhyintState::Failed,
                    last_success_at: peer.last_success_at,
                })
                .collect();
            failure_state(first_failure, peers)
        };
        debug!(%id, ?kind, "failure detected");
        if let Some(phyint) = self.phyints.get_mut(&id) {
            phyint.first_failure_at = Some(first_failure);
        }
        match kind {
            FailureKind::Phyint => {
                self.fail_phyint(id, now);
                self.reduce_group(group_id);
            }
            FailureKind::Group => self.fail_group(group_id, now),
        }
    }

    /// Fail a single interface and promote a standby in its place.
    fn fail_phyint(&mut self, id: PhyintId, _now: Instant) {
        let (group_id, was_active) = {
            let Some(phyint) = self.phyints.get(&id) else {
                return;
            };
            (
                phyint.group,
                !phyint.flags.contains(InterfaceFlags::INACTIVE),
            )
        };
        self.set_phyint_state(id, PhyintState::Failed);
        self.mirror_flags(id, InterfaceFlags::FAILED, InterfaceFlags::INACTIVE);
        if was_active {
            let standby = self.phyints.values().find_map(|peer| {
                (peer.group == group_id
                    && peer.id != id
                    && peer.state == PhyintState::Running
                    && peer.flags.contains(InterfaceFlags::INACTIVE))
                .then_some(peer.id)
            });
            if let Some(standby) = standby {
                debug!(%standby, "activating standby after failure");
                self.mirror_flags(standby, InterfaceFlags::empty(), InterfaceFlags::INACTIVE);
            }
        }
    }

    /// Fail every member of a group together.
    fn fail_group(&mut self, group_id: GroupId, now: Instant) {
        let (members, flush) = {
            let Some(group) = self.groups.get(&group_id) else {
                return;
            };
            (group.members.clone(), !group.targets_are_routers)
        };
        for member in members {
            let Some(phyint) = self.phyints.get_mut(&member) else {
                continue;
            };
            if phyint.state == PhyintState::Offline {
                continue;
            }
            phyint.first_failure_at.get_or_insert(now);
            if flush {
                // Host targets are flushed; the routing table is not
                // consulted for hosts, so discovery must start over.
                for pii in phyint.instances_mut() {
                    pii.targets.clear();
                    pii.reset_probe_state();
                }
            }
            let state = if flush {
                PhyintState::NoTargets
            } else {
                PhyintState::Failed
            };
            self.set_phyint_state(member, state);
            self.mirror_flags(member, InterfaceFlags::FAILED, InterfaceFlags::INACTIVE);
        }
        self.reduce_group(group_id);
        if self.config.transitive_probing {
            self.elect_prober(group_id, now);
        }
    }

    /// Repair an interface, re-running the standby balancing rather than
    /// unconditionally activating it.
    fn repair_phyint(&mut self, id: PhyintId, now: Instant) {
        let group_id = {
            let Some(phyint) = self.phyints.get_mut(&id) else {
                return;
            };
            phyint.first_failure_at = None;
            phyint.prober_unreachable_since = None;
            for pii in phyint.instances_mut() {
                pii.reset_probe_state();
            }
            phyint.group
        };
        self.set_phyint_state(id, PhyintState::Running);
        let standby = self
            .phyints
            .get(&id)
            .is_some_and(|phyint| phyint.flags.contains(InterfaceFlags::STANDBY));
        let other_active = self.phyints.values().any(|peer| {
            peer.group == group_id
                && peer.id != id
                && peer.state == PhyintState::Running
                && !peer.flags.contains(InterfaceFlags::INACTIVE)
        });
        if standby && other_active {
            self.mirror_flags(id, InterfaceFlags::INACTIVE, InterfaceFlags::FAILED);
        } else {
            self.mirror_flags(
                id,
                InterfaceFlags::empty(),
                InterfaceFlags::FAILED | InterfaceFlags::INACTIVE,
            );
        }
        self.reduce_group(group_id);
    }

    /// Nominate exactly one member of a failed group to keep probing.
    fn elect_prober(&mut self, group_id: GroupId, now: Instant) {
        let candidates: Vec<ProberCandidate> = {
            let Some(group) = self.groups.get(&group_id) else {
                return;
            };
            group
                .members
                .iter()
                .filter_map(|member| self.phyints.get(member))
                .map(|phyint| ProberCandidate {
                    id: phyint.id,
                    link_up: phyint.link_up,
                    last_selected_at: phyint.last_prober_at,
                })
                .collect()
        };
        let Some(winner) = select_prober(candidates) else {
            return;
        };
        debug!(%winner, "designated prober selected");
        if let Some(group) = self.groups.get_mut(&group_id) {
            group.has_designated_prober = true;
        }
        let members: Vec<PhyintId> = self
            .groups
            .get(&group_id)
            .map(|group| group.members.clone())
            .unwrap_or_default();
        for member in members {
            let Some(phyint) = self.phyints.get_mut(&member) else {
                continue;
            };
            if member == winner {
                phyint.last_prober_at = Some(now);
                let link_up = phyint.link_up;
                for pii in phyint.instances_mut() {
                    // The prober starts its trial with a clean history so the
                    // losses that failed the group do not count against it.
                    pii.reset_probe_state();
                    if pii.schedule.is_stopped() && link_up {
                        pii.schedule.restart(now);
                    }
                }
            } else {
                for pii in phyint.instances_mut() {
                    pii.schedule.stop();
                }
            }
        }
        self.mirror_flags(winner, InterfaceFlags::PROBER, InterfaceFlags::empty());
    }

    /// The current designated prober rotates out; least-recently-tried next.
    fn rotate_prober(&mut self, group_id: GroupId, now: Instant) {
        if let Some(current) = self.designated_prober(group_id) {
            self.mirror_flags(current, InterfaceFlags::empty(), InterfaceFlags::PROBER);
            if let Some(phyint) = self.phyints.get_mut(&current) {
                for pii in phyint.instances_mut() {
                    pii.reset_probe_state();
                    pii.schedule.stop();
                }
            }
        }
        if let Some(group) = self.groups.get_mut(&group_id) {
            group.has_designated_prober = false;
        }
        self.elect_prober(group_id, now);
    }

    fn designated_prober(&self, group_id: GroupId) -> Option<PhyintId> {
        let group = self.groups.get(&group_id)?;
        if !group.has_designated_prober {
            return None;
        }
        group
            .members
            .iter()
            .filter_map(|member| self.phyints.get(member))
            .find(|phyint| phyint.flags.contains(InterfaceFlags::PROBER))
            .map(|phyint| phyint.id)
    }

    /// A prober with no configured targets gets a bounded trial window; no
    /// reply inside it passes the duty on.
    fn check_prober_trial_window(&mut self, group_id: GroupId, now: Instant) {
        let Some(prober) = self.designated_prober(group_id) else {
            return;
        };
        let window = self
            .groups
            .get(&group_id)
            .map(|group| group.probe_interval * (3 * self.config.probe_failure_count as u32))
            .unwrap_or_default();
        let rotate = self.phyints.get(&prober).is_some_and(|phyint| {
            let no_targets = phyint.instances().all(|pii| pii.targets.is_empty());
            let selected_at = phyint.last_prober_at.unwrap_or(now);
            let replied = phyint
                .last_success_at
                .is_some_and(|success| success > selected_at);
            no_targets && !replied && now.saturating_duration_since(selected_at) >= window
        });
        if rotate {
            debug!(%prober, "prober trial window expired");
            self.rotate_prober(group_id, now);
        }
    }

    /// Tighten a relaxed group once every capable instance's targets have
    /// stayed fast through a full pass.
    fn check_crtt_improved(&mut self, group_id: GroupId) {
        let improved = {
            let Some(group) = self.groups.get(&group_id) else {
                return;
            };
            if !group.is_relaxed() {
                return;
            }
            let threshold = group.probe_interval / LOWER_FDT_TRIGGER;
            group
                .members
                .iter()
                .filter_map(|member| self.phyints.get(member))
                .flat_map(Phyint::instances)
                .filter(|pii| pii.can_probe() && !pii.targets.is_empty())
                .all(|pii| pii.targets.all_below(threshold))
        };
        if improved {
            if let Some(group) = self.groups.get_mut(&group_id) {
                group.tighten_detection_time();
            }
        }
    }

    /// Targets appeared on an interface that had none.
    fn note_targets_arrived(&mut self, id: PhyintId) {
        let next = {
            let Some(phyint) = self.phyints.get(&id) else {
                return;
            };
            if phyint.state != PhyintState::NoTargets {
                return;
            }
            if phyint.flags.contains(InterfaceFlags::FAILED) {
                // Still failed; probing the new targets drives the repair.
                PhyintState::Failed
            } else {
                PhyintState::Running
            }
        };
        self.set_phyint_state(id, next);
    }

    fn set_phyint_state(&mut self, id: PhyintId, next: PhyintState) {
        let Some(phyint) = self.phyints.get_mut(&id) else {
            return;
        };
        let prev = phyint.state;
        if prev == next {
            return;
        }
        phyint.state = next;
        let name = phyint.name.clone();
        tracing::info!(interface = %name, ?prev, ?next, "interface state changed");
        self.events.phyint_state_changed(&name, prev, next);
    }

    /// Recompute the aggregate group state after a member transition.
    fn reduce_group(&mut self, group_id: GroupId) {
        let member_states: Vec<PhyintState> = self
            .groups
            .get(&group_id)
            .map(|group| {
                group
                    .members
                    .iter()
                    .filter_map(|member| self.phyints.get(member))
                    .map(|phyint| phyint.state)
                    .collect()
            })
            .unwrap_or_default();
        let (name, change, left_failed) = {
            let Some(group) = self.groups.get_mut(&group_id) else {
                return;
            };
            let change = group.reduce_state(member_states);
            let left_failed = matches!(change, Some((GroupState::Failed, _)));
            (group.name.clone(), change, left_failed)
        };
        if let Some((prev, next)) = change {
            tracing::info!(group = %name, ?prev, ?next, "group state changed");
            self.events.group_state_changed(&name, prev, next);
        }
        if left_failed {
            self.clear_prober(group_id);
        }
    }

    /// The group has a usable member again; prober duty ends and every
    /// member resumes its own probing.
    fn clear_prober(&mut self, group_id: GroupId) {
        let Some(group) = self.groups.get_mut(&group_id) else {
            return;
        };
        if !group.has_designated_prober {
            return;
        }
        group.has_designated_prober = false;
        let members = group.members.clone();
        let prober = members.iter().copied().find(|member| {
            self.phyints
                .get(member)
                .is_some_and(|phyint| phyint.flags.contains(InterfaceFlags::PROBER))
        });
        if let Some(prober) = prober {
            self.mirror_flags(prober, InterfaceFlags::empty(), InterfaceFlags::PROBER);
        }
        for member in members {
            let Some(phyint) = self.phyints.get_mut(&member) else {
                continue;
            };
            if phyint.state == PhyintState::Offline || !phyint.link_up {
                continue;
            }
            let restart_at = Instant::now();
            for pii in phyint.instances_mut() {
                if pii.schedule.is_stopped() {
                    pii.schedule.restart(restart_at);
                }
            }
        }
    }

    /// Update the engine's view of the interface flags and mirror the change
    /// outward.  A mirroring failure is logged and retried at the next
    /// transition; in-memory state stays authoritative.
    fn mirror_flags(&mut self, id: PhyintId, set: InterfaceFlags, clear: InterfaceFlags) {
        let Some(phyint) = self.phyints.get_mut(&id) else {
            return;
        };
        phyint.flags.insert(set);
        phyint.flags.remove(clear);
        let name = phyint.name.clone();
        if let Err(err) = self.flag_control.set_flags(&name, set, clear) {
            warn!(interface = %name, %err, "failed to mirror interface flags");
        }
    }

    fn is_own_test_addr(&self, addr: IpAddr) -> bool {
        self.phyints.values().any(|phyint| {
            phyint
                .instances()
                .any(|pii| pii.test_addr == Some(addr))
        })
    }

    fn publish_health(&mut self) {
        let mut state = HealthState::default();
        for phyint in self.phyints.values() {
            let stats = phyint
                .instances()
                .map(|pii| pii.stats)
                .fold(crate::types::ProbeStats::default(), |mut acc, stats| {
                    acc += stats;
                    acc
                });
            state.interfaces.insert(
                phyint.name.clone(),
                InterfaceHealth {
                    state: phyint.state,
                    link_up: phyint.link_up,
                    flags: phyint.flags,
                    stats,
                },
            );
            state.probes_missed += phyint
                .instances()
                .map(|pii| pii.schedule.missed())
                .sum::<u64>();
        }
        for group in self.groups.values() {
            if group.anonymous {
                continue;
            }
            state.groups.insert(
                group.name.clone(),
                GroupHealth {
                    state: group.state,
                    probe_interval: group.probe_interval,
                    failure_detection_time: group.failure_detection_time,
                },
            );
        }
        self.health.publish(state);
    }
}

/// Inspect the outstanding probes and mark any past their deadline as lost.
///
/// The deadline is the target's CRTT when known, the group probe interval
/// otherwise.  A target that alone has stopped answering while its peers
/// still do is aged out: routers are marked dead and kept for the next
/// routing table scan, hosts are removed for multicast discovery to replace.
fn mark_instance_timeouts(
    pii: &mut PhyintInstance,
    now: Instant,
    fallback: Duration,
    fail_count: usize,
    routers: bool,
) {
    let snxt = pii.snxt;
    let PhyintInstance {
        ring,
        targets,
        stats,
        acks_in_row,
        last_lost_target,
        ..
    } = pii;
    for back in 1..=MAX_OUTSTANDING_PROBES as u16 {
        let seq = Sequence(snxt.0.wrapping_sub(back));
        let Some(record) = ring.get_mut(seq) else {
            continue;
        };
        if record.outcome != ProbeOutcome::Unacked {
            continue;
        }
        let timeout = targets
            .get(record.target)
            .and_then(|target| target.rtt.crtt())
            .unwrap_or(fallback);
        if now >= record.sent_at + timeout {
            record.outcome = ProbeOutcome::Lost;
            stats.lost += 1;
            *acks_in_row = 0;
            *last_lost_target = Some(record.target);
            if let Some(target) = targets.get_mut(record.target) {
                target.acks_in_row = 0;
                target.losses_in_row += 1;
            }
            debug!(%seq, target = %record.target, "probe lost");
        }
    }
    // Only a target whose peers are still answering can be judged dead; a
    // silent table is the failure state machine's problem.
    let peers_answering = targets
        .iter()
        .any(|target| target.is_active() && target.acks_in_row > 0);
    if !peers_answering {
        return;
    }
    let dead: Vec<IpAddr> = targets
        .iter()
        .filter(|target| target.is_active() && target.losses_in_row >= fail_count * 2)
        .filter_map(Target::addr)
        .collect();
    for addr in dead {
        if routers {
            if let Some(target) = targets.get_mut(addr) {
                target.status = TargetStatus::Dead;
            }
            targets.promote_spare();
            warn!(%addr, "unresponsive router target marked dead");
        } else {
            targets.remove(addr);
            warn!(%addr, "unresponsive host target removed");
        }
    }
}

/// The round-trip sample from a reply, unless the clocks disagree.
///
/// A negative or implausibly large value means clock skew or a scheduler
/// stall, not path latency; the measurement is discarded with no state
/// change.
fn plausible_rtt(reply: &ProbeReply) -> Option<Duration> {
    match reply.received.duration_since(reply.sent) {
        Ok(sample) if sample <= MAX_PLAUSIBLE_RTT => Some(sample),
        Ok(sample) => {
            debug!(sample_ms = sample.as_millis(), "implausibly large round-trip sample discarded");
            None
        }
        Err(_) => {
            debug!("negative round-trip sample discarded");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::MockNetwork;
    use crate::sys::{NullEventSink, NullFlagControl};
    use std::net::Ipv4Addr;
    use std::time::UNIX_EPOCH;

    fn engine() -> Engine<NullFlagControl, NullEventSink> {
        Engine::with_jitter(
            EngineConfig::default(),
            NullFlagControl,
            NullEventSink,
            Box::new(crate::scheduler::FixedJitter(0.5)),
        )
    }

    fn config(name: &str, group: Option<&str>) -> PhyintConfig {
        PhyintConfig {
            name: name.to_string(),
            group: group.map(String::from),
            ipv4_test_addr: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))),
            ipv6_test_addr: None,
            standby: false,
        }
    }

    #[test]
    fn test_duplicate_interface_rejected() {
        let mut engine = engine();
        let now = Instant::now();
        engine.add_phyint(config("net0", Some("prod0")), now).unwrap();
        let err = engine.add_phyint(config("net0", Some("prod0")), now).unwrap_err();
        assert!(matches!(err, Error::BadConfig(_)));
    }

    #[test]
    fn test_group_destroyed_with_last_member() {
        let mut engine = engine();
        let now = Instant::now();
        let id = engine.add_phyint(config("net0", Some("prod0")), now).unwrap();
        assert!(engine.group_state("prod0").is_some());
        engine.remove_phyint(id).unwrap();
        assert!(engine.group_state("prod0").is_none());
    }

    #[test]
    fn test_interface_without_targets_waits() {
        let mut engine = engine();
        let now = Instant::now();
        let id = engine.add_phyint(config("net0", Some("prod0")), now).unwrap();
        assert_eq!(Some(PhyintState::NoTargets), engine.phyint_state(id));
        // A group with nothing usable reduces to failed until discovery
        // produces a target.
        assert_eq!(Some(GroupState::Failed), engine.group_state("prod0"));
    }

    #[test]
    fn test_router_targets_start_probing() {
        let mut engine = engine();
        let now = Instant::now();
        let id = engine.add_phyint(config("net0", Some("prod0")), now).unwrap();
        engine
            .set_router_targets(id, Family::Ipv4, &[IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))])
            .unwrap();
        assert_eq!(Some(PhyintState::Running), engine.phyint_state(id));
        assert_eq!(Some(GroupState::Ok), engine.group_state("prod0"));
    }

    #[test]
    fn test_ungrouped_failure_does_not_cascade() {
        let mut engine = engine();
        let now = Instant::now();
        let a = engine.add_phyint(config("net0", None), now).unwrap();
        let mut second = config("net1", None);
        second.ipv4_test_addr = Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 3)));
        let b = engine.add_phyint(second, now).unwrap();
        let router = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        engine.set_router_targets(a, Family::Ipv4, &[router]).unwrap();
        engine.set_router_targets(b, Family::Ipv4, &[router]).unwrap();

        let mut network = MockNetwork::new();
        network.expect_send_probe().returning(|_| Ok(()));
        let mut at = now;
        // Drive net0's probes to timeout while net1 never even sends a
        // reply; ungrouped interfaces must fail alone.
        for _ in 0..120 {
            engine.tick(&mut network, at, UNIX_EPOCH + Duration::from_secs(1));
            at += Duration::from_millis(500);
        }
        assert_eq!(Some(PhyintState::Failed), engine.phyint_state(a));
        assert_eq!(Some(PhyintState::Failed), engine.phyint_state(b));
    }

    #[test]
    fn test_next_timeout_empty_engine() {
        let engine = engine();
        assert_eq!(None, engine.next_timeout(Instant::now()));
    }

    #[test]
    fn test_negative_rtt_discarded() {
        let reply = ProbeReply {
            key: InstanceKey {
                phyint: PhyintId(0),
                family: Family::Ipv4,
            },
            src: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            probe_id: ProbeId(1),
            seq: Sequence(1),
            kind: ProbeKind::Unicast,
            magic_ok: true,
            sent: UNIX_EPOCH + Duration::from_secs(10),
            received: UNIX_EPOCH + Duration::from_secs(5),
        };
        assert_eq!(None, plausible_rtt(&reply));
    }

    #[test]
    fn test_implausible_rtt_discarded() {
        let reply = ProbeReply {
            key: InstanceKey {
                phyint: PhyintId(0),
                family: Family::Ipv4,
            },
            src: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            probe_id: ProbeId(1),
            seq: Sequence(1),
            kind: ProbeKind::Unicast,
            magic_ok: true,
            sent: UNIX_EPOCH,
            received: UNIX_EPOCH + MAX_PLAUSIBLE_RTT + Duration::from_secs(1),
        };
        assert_eq!(None, plausible_rtt(&reply));
    }
}
