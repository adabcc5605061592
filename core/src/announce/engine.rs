//! Announce engine: readiness gating, single-flight coalescing, payload
//! emission, periodic ticks.
//!
//! Announcing before any usable interface is online makes the transport
//! log "no usable interfaces" on every attempt, which is pure noise on
//! mobile. The engine therefore polls transport state until an enabled
//! interface is online (preferring TCP for a short window, since TCP is
//! usually the route to the wider network) and only then emits.
//!
//! Concurrency is an atomic in-flight/queued pair, never a mutex held
//! across the attempt: callers must not block behind a gate that can take
//! twenty seconds.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::interfaces::lookup_online;
use crate::node::core::NodeInner;

use super::payload::{self, AvatarMeta};

/// Hard deadline for one announce attempt to become ready.
const READY_DEADLINE: Duration = Duration::from_secs(20);

/// Window during which enabled-but-offline TCP suppresses readiness.
const TCP_PREFER_WINDOW: Duration = Duration::from_secs(6);

/// Readiness poll interval.
const READY_POLL: Duration = Duration::from_millis(500);

/// Stabilisation window after the first ready result; TCP can flap right
/// after connect.
const READY_STABILIZE: Duration = Duration::from_secs(1);

/// Outcome of one readiness probe, with diagnostics for the skip log.
#[derive(Debug)]
pub(crate) struct Readiness {
    pub(crate) ready: bool,
    pub(crate) enabled: Vec<String>,
    pub(crate) online: Vec<String>,
    pub(crate) offline: Vec<String>,
}

impl NodeInner {
    /// Schedule a delivery announce.
    ///
    /// At most one attempt is in flight at any time; a second caller sets
    /// the queued flag and returns immediately. A completed attempt
    /// consumes the flag and fires exactly one follow-up with reason
    /// `"queued"`.
    pub(crate) fn announce_delivery(self: &Arc<Self>, reason: &str) {
        let reason = reason.trim();
        let reason = if reason.is_empty() { "manual" } else { reason }.to_string();

        if self
            .announce_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.announce_queued.store(true, Ordering::Release);
            return;
        }

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.run_announce_attempt(reason).await;
        });
    }

    async fn run_announce_attempt(self: Arc<Self>, reason: String) {
        // A host resume leaves sockets half-dead; reset enabled interfaces
        // before gating so the poll sees fresh drivers.
        if reason == "resume" {
            self.reset_enabled_interfaces(&reason).await;
        }

        let dest_hex = hex::encode(self.delivery_destination_hash());
        let started = Instant::now();
        let deadline = started + READY_DEADLINE;
        let prefer_deadline = started + TCP_PREFER_WINDOW;

        loop {
            if !self.is_running().await {
                self.announce_in_flight.store(false, Ordering::Release);
                return;
            }

            let readiness = self.announce_readiness(prefer_deadline);
            if readiness.ready {
                sleep(READY_STABILIZE).await;
                if self.announce_readiness(Instant::now()).ready {
                    break;
                }
            }

            if Instant::now() >= deadline {
                let r = self.announce_readiness(Instant::now());
                if r.enabled.is_empty() {
                    info!(
                        dest = %dest_hex,
                        reason = %reason,
                        skipped = "no_enabled_interfaces",
                        "announce tx skipped"
                    );
                } else {
                    info!(
                        dest = %dest_hex,
                        reason = %reason,
                        skipped = "no_usable_interfaces",
                        enabled = %r.enabled.join(","),
                        online = %r.online.join(","),
                        offline = %r.offline.join(","),
                        "announce tx skipped"
                    );
                }
                // Queued stays set; the next trigger retries.
                self.announce_in_flight.store(false, Ordering::Release);
                return;
            }

            sleep(READY_POLL).await;
        }

        let r = self.announce_readiness(Instant::now());
        if r.enabled.is_empty() {
            info!(dest = %dest_hex, reason = %reason, "announce tx");
        } else {
            info!(
                dest = %dest_hex,
                reason = %reason,
                enabled = %r.enabled.join(","),
                online = %r.online.join(","),
                offline = %r.offline.join(","),
                "announce tx"
            );
        }

        let app_data = self.compose_announce_app_data();
        let delivery = self.delivery_in.read().unwrap().clone();
        if let Err(e) = delivery.announce(app_data) {
            warn!(dest = %dest_hex, error = %e, "announce emission failed");
        }

        self.announce_in_flight.store(false, Ordering::Release);
        if self.announce_queued.swap(false, Ordering::AcqRel) {
            self.announce_delivery("queued");
        }
    }

    /// Probe whether an announce would reach anything right now.
    ///
    /// With no enabled interfaces configured, any online runtime interface
    /// counts. Otherwise at least one enabled interface must be online,
    /// and while `prefer_deadline` has not passed, enabled-but-offline TCP
    /// holds readiness back.
    pub(crate) fn announce_readiness(&self, prefer_deadline: Instant) -> Readiness {
        let enabled_cfg = self.enabled_interfaces();
        if enabled_cfg.is_empty() {
            return Readiness {
                ready: self.has_any_online_interface(),
                enabled: Vec::new(),
                online: Vec::new(),
                offline: Vec::new(),
            };
        }

        let (by_short, by_name) = self.interface_online_maps();
        let mut enabled = Vec::with_capacity(enabled_cfg.len());
        let mut online = Vec::new();
        let mut offline = Vec::new();
        let mut has_tcp_enabled = false;
        let mut has_tcp_online = false;

        for iface in &enabled_cfg {
            enabled.push(iface.name.clone());
            if iface.is_tcp() {
                has_tcp_enabled = true;
            }
            if lookup_online(&by_short, &by_name, iface.name.trim()) {
                online.push(iface.name.clone());
                if iface.is_tcp() {
                    has_tcp_online = true;
                }
            } else {
                offline.push(iface.name.clone());
            }
        }

        let mut ready = !online.is_empty();
        if ready && has_tcp_enabled && !has_tcp_online && Instant::now() < prefer_deadline {
            ready = false;
        }

        Readiness {
            ready,
            enabled,
            online,
            offline,
        }
    }

    /// Compose the announce app-data from the current display name, stamp
    /// cost, and avatar.
    pub(crate) fn compose_announce_app_data(&self) -> Vec<u8> {
        let display_name = self.display_name.read().unwrap().clone();
        let avatar = self.avatar.read().unwrap().clone();
        let meta = avatar.map(|avatar| AvatarMeta {
            fingerprint: avatar.fingerprint.to_vec(),
            mime: if avatar.mime.is_empty() {
                "image/png".to_string()
            } else {
                avatar.mime
            },
            size: avatar.bytes.len() as u64,
            updated: avatar.updated,
        });
        payload::compose_app_data(
            &display_name,
            self.options.delivery_stamp_cost,
            meta.as_ref(),
        )
    }

    /// Periodic announce loop. Terminated by the stop signal.
    pub(crate) async fn run_announce_ticker(self: Arc<Self>) {
        let period = Duration::from_secs(self.options.announce_interval_secs);
        if period.is_zero() {
            return;
        }
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            if !self.is_running().await {
                break;
            }
            self.announce_delivery("periodic");
        }
    }
}
