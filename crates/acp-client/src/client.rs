//! High-level ACP client facade.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use acp_codec::cflbinary::{self, Value};
use acp_codec::message::Message;
use acp_codec::property::{self, Property};
use acp_core::error::{ProtocolError, Result};

use crate::auth;
use crate::session::{Session, SessionHandle};

/// Administration port of an AirPort base station.
pub const DEFAULT_PORT: u16 = 5009;

/// A high-level client for one base station.
pub struct Client {
    session: Session,
    password: String,
    auth_gate: Mutex<()>,
    authenticated: AtomicBool,
}

impl Client {
    /// Connect to `host:port` with the administrator password.
    pub async fn connect(host: &str, port: u16, password: &str) -> Result<Client> {
        let session = Session::connect(host, port).await?;
        Ok(Self::over(session, password))
    }

    /// Build a client over an existing session.
    pub fn over(session: Session, password: &str) -> Client {
        Client {
            session,
            password: password.to_string(),
            auth_gate: Mutex::new(()),
            authenticated: AtomicBool::new(false),
        }
    }

    /// The underlying session, for advanced use.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Run the SRP handshake and enable session encryption. Idempotent:
    /// concurrent callers share one in-flight attempt, and repeated calls
    /// after success return immediately.
    pub async fn authenticate(&self) -> Result<()> {
        if self.authenticated.load(Ordering::Acquire) {
            return Ok(());
        }
        let _gate = self.auth_gate.lock().await;
        if self.authenticated.load(Ordering::Acquire) {
            return Ok(());
        }
        auth::run_handshake(&self.session, &self.password).await?;
        self.authenticated.store(true, Ordering::Release);
        Ok(())
    }

    /// Read the named properties, in request order.
    pub async fn get_properties(&self, tags: &[&str]) -> Result<Vec<Property>> {
        let mut body = Vec::new();
        for tag in tags {
            body.extend_from_slice(&Property::query(tag)?.compose());
        }
        let request = Message::get_prop(&self.password, body);
        self.session
            .exchange(move |mut handle| async move {
                handle.send(&request.compose()).await?;
                let reply = handle.receive_message_header().await?;
                if reply.error_code != 0 {
                    return Err(ProtocolError {
                        code: reply.error_code,
                    }
                    .into());
                }
                let mut properties = Vec::new();
                while let Some(prop) = receive_element(&mut handle).await? {
                    properties.push(prop);
                }
                Ok(properties)
            })
            .await
    }

    /// Write properties, reading the per-property acknowledgements.
    pub async fn set_properties(&self, properties: &[Property]) -> Result<()> {
        let mut body = Vec::new();
        for prop in properties {
            body.extend_from_slice(&prop.compose());
        }
        body.extend_from_slice(&property::sentinel());
        let request = Message::set_prop(&self.password, body);
        self.session
            .exchange(move |mut handle| async move {
                handle.send(&request.compose()).await?;
                let reply = handle.receive_message_header().await?;
                if reply.error_code != 0 {
                    return Err(ProtocolError {
                        code: reply.error_code,
                    }
                    .into());
                }
                while receive_element(&mut handle).await?.is_some() {}
                Ok(())
            })
            .await
    }

    /// Enumerate supported features as a CFL tree.
    pub async fn get_features(&self) -> Result<Value> {
        let request = Message::feat();
        self.session
            .exchange(move |mut handle| async move {
                handle.send(&request.compose()).await?;
                let reply = handle.receive_message().await?;
                if reply.error_code != 0 {
                    return Err(ProtocolError {
                        code: reply.error_code,
                    }
                    .into());
                }
                Ok(cflbinary::parse(&reply.body.unwrap_or_default())?)
            })
            .await
    }

    /// Liveness check; returns the echoed body.
    pub async fn echo(&self, payload: Vec<u8>) -> Result<Vec<u8>> {
        let request = Message::echo(&self.password, Some(payload));
        self.raw_command(request).await
    }

    /// Trigger a device action; the reply body is surfaced unparsed.
    pub async fn perform(&self, body: Vec<u8>) -> Result<Vec<u8>> {
        let request = Message::perform(&self.password, body);
        self.raw_command(request).await
    }

    /// Structured RPC: a CFL tree in, a CFL tree out.
    pub async fn rpc(&self, payload: &Value) -> Result<Value> {
        let request = Message::rpc(&self.password, cflbinary::compose(payload));
        let reply = self.raw_command(request).await?;
        Ok(cflbinary::parse(&reply)?)
    }

    /// Write the primary firmware image; the reply body is surfaced
    /// unparsed.
    pub async fn flash_primary(&self, image: Vec<u8>) -> Result<Vec<u8>> {
        debug!(len = image.len(), "flashing primary firmware");
        let request = Message::flash_primary(&self.password, image);
        self.raw_command(request).await
    }

    /// Write the secondary firmware image.
    pub async fn flash_secondary(&self, image: Vec<u8>) -> Result<Vec<u8>> {
        let request = Message::flash_secondary(&self.password, image);
        self.raw_command(request).await
    }

    /// Write the bootloader image.
    pub async fn flash_bootloader(&self, image: Vec<u8>) -> Result<Vec<u8>> {
        let request = Message::flash_bootloader(&self.password, image);
        self.raw_command(request).await
    }

    /// Ask the device to reboot.
    pub async fn reboot(&self) -> Result<()> {
        self.set_properties(&[Property::new("acRB", 0i64)?]).await
    }

    /// Subscribe to monitor frames with a CFL filter payload. Events arrive
    /// on the receiver returned by [`Client::monitor_events`].
    pub async fn monitor_subscribe(&self, filter: &Value) -> Result<()> {
        let request = Message::monitor(&self.password, cflbinary::compose(filter));
        self.session
            .exchange(move |mut handle| async move {
                handle.send(&request.compose()).await?;
                let reply = handle.receive_message_header().await?;
                if reply.error_code != 0 {
                    return Err(ProtocolError {
                        code: reply.error_code,
                    }
                    .into());
                }
                Ok(())
            })
            .await
    }

    /// Receiver of unsolicited monitor events.
    pub fn monitor_events(&self) -> broadcast::Receiver<Value> {
        self.session.monitor_events()
    }

    /// Close the connection, failing pending queued work.
    pub async fn close(&self) {
        self.session.close().await;
    }

    async fn raw_command(&self, request: Message) -> Result<Vec<u8>> {
        self.session
            .exchange(move |mut handle| async move {
                handle.send(&request.compose()).await?;
                let reply = handle.receive_message().await?;
                if reply.error_code != 0 {
                    return Err(ProtocolError {
                        code: reply.error_code,
                    }
                    .into());
                }
                Ok(reply.body.unwrap_or_default())
            })
            .await
    }
}

/// Read one property element (header then value bytes); `None` marks the
/// list terminator, and error elements surface as `Error::Property`.
async fn receive_element(handle: &mut SessionHandle) -> Result<Option<Property>> {
    let header = handle.receive_property_element_header().await?;
    let value = handle.receive(header.size as usize).await?;
    header.into_property(value)
}
