//! Avatar and attachment fetchers.
//!
//! Both fetch paths are symmetric: resolve the peer identity, try the
//! delivery destination then the profile destination, open a link, submit
//! the request, and wait for whichever arrives first out of a metadata
//! reply, a raw-bytes reply (compatibility), or a concluded resource
//! carrying the bytes. The map response may precede or follow the
//! resource; the loop handles either order.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rmpv::Value;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::debug;

use crate::node::core::{Node, NodeInner, PROFILE_APP, PROFILE_ASPECT};
use crate::node::error::FetchError;
use crate::runtime::{
    destination_hash, DestinationHash, Link, DELIVERY_APP, DELIVERY_ASPECT,
};

use super::service::{
    ATTACHMENT_REQUEST_PATH, ATTACHMENT_RESOURCE_KIND, AVATAR_REQUEST_PATH, AVATAR_RESOURCE_KIND,
};
use super::values::{bin_field, bool_field, kv, str_field};

/// Default avatar fetch timeout when the caller passes zero.
const DEFAULT_AVATAR_TIMEOUT: Duration = Duration::from_secs(5);

/// Default attachment fetch timeout when the caller passes zero.
const DEFAULT_ATTACHMENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Cap on the path-acquisition wait inside one fetch.
const PATH_WAIT_MAX: Duration = Duration::from_secs(4);

/// Path-acquisition poll interval.
const PATH_POLL: Duration = Duration::from_millis(150);

/// Result of an avatar fetch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AvatarFetch {
    /// Fingerprint of the peer avatar, hex-encoded.
    pub hash_hex: String,
    /// Mime type reported by the peer.
    pub mime: String,
    /// Avatar bytes, base64-encoded. Empty on `unchanged`/`not_present`.
    pub data_base64: String,
    /// The known fingerprint matched; no bytes were transferred.
    pub unchanged: bool,
    /// The peer has no avatar.
    pub not_present: bool,
}

/// Result of an attachment fetch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AttachmentFetch {
    /// Content hash, hex-encoded.
    pub hash_hex: String,
    /// Local path of the fetched (or cached) blob.
    pub path: Option<PathBuf>,
    /// Mime type, possibly empty.
    pub mime: String,
    /// Sanitised name, possibly empty.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// The peer does not hold the attachment.
    pub not_present: bool,
}

/// Tears the link down when the fetch scope ends, whatever the outcome.
struct LinkGuard(Arc<dyn Link>);

impl Drop for LinkGuard {
    fn drop(&mut self) {
        self.0.teardown();
    }
}

impl Node {
    /// Fetch a peer's avatar.
    ///
    /// `known_fingerprint_hex` is the fingerprint already cached by the
    /// caller (empty for none); when it matches the peer's current avatar
    /// the reply is `unchanged` and no bytes travel. A zero timeout is
    /// rewritten to 5 seconds.
    pub async fn fetch_contact_avatar(
        &self,
        destination_hash_hex: &str,
        known_fingerprint_hex: &str,
        timeout: Duration,
    ) -> Result<AvatarFetch, FetchError> {
        let timeout = if timeout.is_zero() {
            DEFAULT_AVATAR_TIMEOUT
        } else {
            timeout
        };

        let identity = self
            .wait_for_identity(destination_hash_hex, timeout)
            .await?;

        let known = if known_fingerprint_hex.is_empty() {
            None
        } else {
            hex::decode(known_fingerprint_hex.trim())
                .ok()
                .filter(|bytes| !bytes.is_empty())
        };

        let mut last_err = FetchError::RequestFailed;
        for (app, aspect, label) in candidates() {
            debug!(dest = %destination_hash_hex, via = label, "avatar fetch: try");
            let out_dest = destination_hash(&identity.public_key, app, aspect);
            match self
                .inner
                .fetch_avatar_via(out_dest, known.clone(), timeout)
                .await
            {
                Ok(fetch) => return Ok(fetch),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    /// Fetch an attachment from a peer by content hash.
    ///
    /// The per-peer cache is consulted first, then the local outgoing
    /// store for self-addressed fetches; only then does the fetch touch
    /// the network. A zero timeout is rewritten to 10 seconds.
    pub async fn fetch_contact_attachment(
        &self,
        destination_hash_hex: &str,
        attachment_hash_hex: &str,
        timeout: Duration,
    ) -> Result<AttachmentFetch, FetchError> {
        let timeout = if timeout.is_zero() {
            DEFAULT_ATTACHMENT_TIMEOUT
        } else {
            timeout
        };
        let remote = destination_hash_hex.trim().to_ascii_lowercase();
        let hash_hex = attachment_hash_hex.trim().to_ascii_lowercase();
        if remote.is_empty() || hash_hex.is_empty() {
            return Err(FetchError::InvalidInput("missing params".into()));
        }

        if let Some(cached) = self.inner.attachments.cached_incoming(&remote, &hash_hex) {
            return Ok(AttachmentFetch {
                hash_hex: cached.hash_hex,
                path: Some(cached.path),
                mime: cached.mime,
                name: cached.name,
                size: cached.size,
                not_present: false,
            });
        }

        // Self-addressed fetches read the local outgoing store directly.
        if remote == self.destination_hash_hex() {
            if let Ok((info, _bytes)) = self.inner.attachments.load_outgoing(&hash_hex) {
                let path = self
                    .inner
                    .attachments
                    .outgoing_dir()
                    .join(format!("{hash_hex}.bin"));
                return Ok(AttachmentFetch {
                    hash_hex,
                    path: Some(path),
                    mime: info.mime,
                    name: info.name,
                    size: info.size,
                    not_present: false,
                });
            }
        }

        let hash_bytes = hex::decode(&hash_hex)
            .ok()
            .filter(|bytes| !bytes.is_empty())
            .ok_or_else(|| FetchError::InvalidInput("invalid attachment hash".into()))?;

        let identity = self.wait_for_identity(&remote, timeout).await?;

        let mut last_err = FetchError::RequestFailed;
        for (app, aspect, label) in candidates() {
            debug!(dest = %remote, hash = %hash_hex, via = label, "attachment fetch: try");
            let out_dest = destination_hash(&identity.public_key, app, aspect);
            match self
                .inner
                .fetch_attachment_via(out_dest, &remote, &hash_bytes, timeout)
                .await
            {
                Ok(fetch) => return Ok(fetch),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }
}

fn candidates() -> [(&'static str, &'static str, &'static str); 2] {
    [
        (DELIVERY_APP, DELIVERY_ASPECT, "lxmf.delivery"),
        (PROFILE_APP, PROFILE_ASPECT, "lantern.profile"),
    ]
}

impl NodeInner {
    async fn fetch_avatar_via(
        &self,
        destination: DestinationHash,
        known: Option<Vec<u8>>,
        timeout: Duration,
    ) -> Result<AvatarFetch, FetchError> {
        self.await_path(&destination, timeout).await;

        let deadline = Instant::now() + timeout;
        let (link, _guard, mut closed_rx) = self.establish_link(&destination, deadline).await?;

        let (res_tx, mut res_rx) = mpsc::channel(1);
        link.accept_all_resources();
        link.set_resource_concluded(Box::new(move |resource| {
            let _ = res_tx.try_send(resource);
        }));

        let payload = match known {
            Some(bytes) => Value::Map(vec![kv("h", Value::Binary(bytes))]),
            None => Value::Map(Vec::new()),
        };
        let (resp_tx, mut resp_rx) = mpsc::channel::<Value>(1);
        let (fail_tx, mut fail_rx) = mpsc::channel::<()>(1);
        link.request(
            AVATAR_REQUEST_PATH,
            payload,
            Box::new(move |response| {
                let _ = resp_tx.try_send(response);
            }),
            Box::new(move || {
                let _ = fail_tx.try_send(());
            }),
            timeout,
        )
        .map_err(|_| FetchError::RequestSendFailed)?;

        let mut resp_hash: Vec<u8> = Vec::new();
        let mut resp_mime = String::new();

        loop {
            tokio::select! {
                Some(response) = resp_rx.recv() => match response {
                    Value::Map(_) => {
                        if !bool_field(&response, "ok") {
                            debug!("avatar fetch: not present");
                            return Ok(AvatarFetch { not_present: true, ..Default::default() });
                        }
                        if let Some(hash) = bin_field(&response, "h") {
                            resp_hash = hash;
                        }
                        if let Some(mime) = str_field(&response, "t") {
                            resp_mime = mime;
                        }
                        if bool_field(&response, "unchanged") {
                            debug!("avatar fetch: unchanged");
                            return Ok(AvatarFetch {
                                hash_hex: hex::encode(&resp_hash),
                                mime: resp_mime,
                                unchanged: true,
                                ..Default::default()
                            });
                        }
                        // Bytes arrive as a resource; keep waiting.
                    }
                    Value::Binary(bytes) => {
                        debug!(size = bytes.len(), "avatar fetch: ok raw");
                        return Ok(AvatarFetch {
                            hash_hex: hex::encode(&resp_hash),
                            mime: resp_mime,
                            data_base64: BASE64.encode(&bytes),
                            ..Default::default()
                        });
                    }
                    other => {
                        return Err(FetchError::Protocol(format!(
                            "unexpected avatar response: {other:?}"
                        )));
                    }
                },
                Some(resource) = res_rx.recv() => {
                    if !resource.complete {
                        return Err(FetchError::ResourceFailed);
                    }
                    if let Some(kind) = str_field(&resource.metadata, "kind") {
                        if !kind.is_empty() && kind != AVATAR_RESOURCE_KIND {
                            return Err(FetchError::Protocol(format!(
                                "unexpected resource kind: {kind}"
                            )));
                        }
                    }
                    if let Some(hash) = bin_field(&resource.metadata, "h") {
                        resp_hash = hash;
                    }
                    if let Some(mime) = str_field(&resource.metadata, "t") {
                        if !mime.is_empty() {
                            resp_mime = mime;
                        }
                    }
                    let data = fs::read(&resource.data_file)?;
                    debug!(size = data.len(), "avatar fetch: ok resource");
                    return Ok(AvatarFetch {
                        hash_hex: hex::encode(&resp_hash),
                        mime: resp_mime,
                        data_base64: BASE64.encode(&data),
                        ..Default::default()
                    });
                },
                Some(()) = fail_rx.recv() => {
                    debug!("avatar fetch: request failed");
                    return Err(FetchError::RequestFailed);
                },
                Some(()) = closed_rx.recv() => {
                    return Err(FetchError::LinkClosed);
                },
                _ = sleep_until(deadline) => {
                    debug!("avatar fetch: request timeout");
                    return Err(FetchError::Timeout);
                },
            }
        }
    }

    async fn fetch_attachment_via(
        &self,
        destination: DestinationHash,
        remote_hex: &str,
        hash_bytes: &[u8],
        timeout: Duration,
    ) -> Result<AttachmentFetch, FetchError> {
        self.await_path(&destination, timeout).await;

        let deadline = Instant::now() + timeout;
        let (link, _guard, mut closed_rx) = self.establish_link(&destination, deadline).await?;

        let (res_tx, mut res_rx) = mpsc::channel(1);
        link.accept_all_resources();
        link.set_resource_concluded(Box::new(move |resource| {
            let _ = res_tx.try_send(resource);
        }));

        let payload = Value::Map(vec![kv("h", Value::Binary(hash_bytes.to_vec()))]);
        let (resp_tx, mut resp_rx) = mpsc::channel::<Value>(1);
        let (fail_tx, mut fail_rx) = mpsc::channel::<()>(1);
        link.request(
            ATTACHMENT_REQUEST_PATH,
            payload,
            Box::new(move |response| {
                let _ = resp_tx.try_send(response);
            }),
            Box::new(move || {
                let _ = fail_tx.try_send(());
            }),
            timeout,
        )
        .map_err(|_| FetchError::RequestSendFailed)?;

        let hash_hex = hex::encode(hash_bytes);
        let mut resp_mime = String::new();
        let mut resp_name = String::new();

        loop {
            tokio::select! {
                Some(response) = resp_rx.recv() => match response {
                    Value::Map(_) => {
                        if !bool_field(&response, "ok") {
                            return Ok(AttachmentFetch {
                                hash_hex,
                                not_present: true,
                                ..Default::default()
                            });
                        }
                        if let Some(mime) = str_field(&response, "t") {
                            resp_mime = mime;
                        }
                        if let Some(name) = str_field(&response, "n") {
                            resp_name = name;
                        }
                        // Bytes arrive as a resource; keep waiting.
                    }
                    Value::Binary(bytes) => {
                        let cached = self.attachments.cache_incoming(
                            remote_hex,
                            &hash_hex,
                            &bytes,
                            &resp_mime,
                            &resp_name,
                        )?;
                        return Ok(AttachmentFetch {
                            hash_hex: cached.hash_hex,
                            path: Some(cached.path),
                            mime: cached.mime,
                            name: cached.name,
                            size: cached.size,
                            not_present: false,
                        });
                    }
                    other => {
                        return Err(FetchError::Protocol(format!(
                            "unexpected attachment response: {other:?}"
                        )));
                    }
                },
                Some(resource) = res_rx.recv() => {
                    if !resource.complete {
                        return Err(FetchError::ResourceFailed);
                    }
                    if let Some(kind) = str_field(&resource.metadata, "kind") {
                        if !kind.is_empty() && kind != ATTACHMENT_RESOURCE_KIND {
                            return Err(FetchError::Protocol(format!(
                                "unexpected resource kind: {kind}"
                            )));
                        }
                    }
                    if let Some(mime) = str_field(&resource.metadata, "t") {
                        if !mime.is_empty() {
                            resp_mime = mime;
                        }
                    }
                    if let Some(name) = str_field(&resource.metadata, "n") {
                        if !name.is_empty() {
                            resp_name = name;
                        }
                    }
                    let data = fs::read(&resource.data_file)?;
                    let cached = self.attachments.cache_incoming(
                        remote_hex,
                        &hash_hex,
                        &data,
                        &resp_mime,
                        &resp_name,
                    )?;
                    return Ok(AttachmentFetch {
                        hash_hex: cached.hash_hex,
                        path: Some(cached.path),
                        mime: cached.mime,
                        name: cached.name,
                        size: cached.size,
                        not_present: false,
                    });
                },
                Some(()) = fail_rx.recv() => {
                    return Err(FetchError::RequestFailed);
                },
                Some(()) = closed_rx.recv() => {
                    return Err(FetchError::LinkClosed);
                },
                _ = sleep_until(deadline) => {
                    return Err(FetchError::Timeout);
                },
            }
        }
    }

    /// Wait briefly for a path to the destination. Link establishment
    /// without a path usually just times out, so a short bounded wait here
    /// saves the whole budget.
    async fn await_path(&self, destination: &DestinationHash, timeout: Duration) {
        if self.transport.has_path(destination) {
            return;
        }
        debug!(dest = %hex::encode(destination), "fetch: no path yet, requesting");
        self.transport.request_path(destination);

        let wait_deadline = Instant::now() + timeout.min(PATH_WAIT_MAX);
        while !self.transport.has_path(destination) && Instant::now() < wait_deadline {
            sleep(PATH_POLL).await;
        }
        if self.transport.has_path(destination) {
            debug!(dest = %hex::encode(destination), "fetch: path acquired");
        }
    }

    /// Open a link and wait for establishment. Returns the link, its
    /// teardown guard, and the closed-notification channel for later
    /// select arms.
    async fn establish_link(
        &self,
        destination: &DestinationHash,
        deadline: Instant,
    ) -> Result<(Arc<dyn Link>, LinkGuard, mpsc::Receiver<()>), FetchError> {
        let (est_tx, mut est_rx) = mpsc::channel::<()>(1);
        let (closed_tx, mut closed_rx) = mpsc::channel::<()>(1);

        let link = self
            .transport
            .open_link(
                destination,
                Box::new(move || {
                    let _ = est_tx.try_send(());
                }),
                Box::new(move || {
                    let _ = closed_tx.try_send(());
                }),
            )
            .map_err(|e| FetchError::Transport(format!("open link: {e}")))?;
        let guard = LinkGuard(link.clone());

        tokio::select! {
            Some(()) = est_rx.recv() => {}
            Some(()) = closed_rx.recv() => {
                debug!("fetch: link closed before establishment");
                return Err(FetchError::LinkClosed);
            }
            _ = sleep_until(deadline) => {
                debug!("fetch: link establish timeout");
                return Err(FetchError::Timeout);
            }
        }

        // Identify so the peer can apply allow-lists.
        link.identify(&self.identity);
        Ok((link, guard, closed_rx))
    }
}
