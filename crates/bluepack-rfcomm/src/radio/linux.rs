//! Linux RFCOMM radio using bluer (BlueZ)

use std::io;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bluer::rfcomm::{Profile, ProfileHandle, ReqError, Role, Stream};
use bluer::{Adapter, AdapterEvent, Address, Device, Session};
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use bluepack_core::radio::{BoxedStream, OutboundSocket, Radio, ServiceListener};
use bluepack_core::{PeerAddress, PeerDevice, ServiceIdentity};

use crate::config::RfcommConfig;
use crate::error::{Result, RfcommError};

// ----------------------------------------------------------------------------
// Linux Implementation
// ----------------------------------------------------------------------------

/// Radio backed by a BlueZ adapter
pub struct RfcommRadio {
    session: Session,
    adapter: Adapter,
    config: RfcommConfig,
    discovery: Mutex<Option<CancellationToken>>,
}

impl RfcommRadio {
    /// Connect to BlueZ and pick the configured adapter
    pub async fn new(config: RfcommConfig) -> Result<Self> {
        let session = Session::new()
            .await
            .map_err(|e| RfcommError::SessionUnavailable(e.to_string()))?;

        let adapter = match &config.adapter_name {
            Some(name) => session.adapter(name),
            None => session.default_adapter().await,
        }
        .map_err(|e| RfcommError::AdapterNotAvailable(e.to_string()))?;

        let powered = adapter
            .is_powered()
            .await
            .map_err(|e| RfcommError::AdapterNotAvailable(e.to_string()))?;
        if !powered {
            if !config.power_on {
                return Err(RfcommError::AdapterPoweredOff {
                    adapter: adapter.name().to_string(),
                });
            }
            adapter.set_powered(true).await.map_err(|e| {
                warn!("Failed to power on adapter {}: {}", adapter.name(), e);
                RfcommError::AdapterPoweredOff {
                    adapter: adapter.name().to_string(),
                }
            })?;
        }

        info!("Using Bluetooth adapter {}", adapter.name());
        Ok(Self {
            session,
            adapter,
            config,
            discovery: Mutex::new(None),
        })
    }

    pub fn adapter_name(&self) -> &str {
        self.adapter.name()
    }

    pub async fn local_address(&self) -> Result<PeerAddress> {
        self.adapter
            .address()
            .await
            .map(from_bluer)
            .map_err(|e| RfcommError::AdapterNotAvailable(e.to_string()))
    }

    pub async fn is_powered(&self) -> Result<bool> {
        self.adapter
            .is_powered()
            .await
            .map_err(|e| RfcommError::AdapterNotAvailable(e.to_string()))
    }

    /// Let other devices find this one for the configured window
    pub async fn make_discoverable(&self) -> Result<()> {
        let seconds = u32::try_from(self.config.discoverable_timeout.as_secs()).unwrap_or(u32::MAX);
        self.adapter
            .set_discoverable_timeout(seconds)
            .await
            .map_err(|e| RfcommError::AdapterNotAvailable(e.to_string()))?;
        self.adapter
            .set_discoverable(true)
            .await
            .map_err(|e| RfcommError::AdapterNotAvailable(e.to_string()))?;

        info!("Adapter {} discoverable for {}s", self.adapter.name(), seconds);
        Ok(())
    }

    /// Devices this adapter is paired with
    pub async fn paired_devices(&self) -> Result<Vec<PeerDevice>> {
        let addresses = self
            .adapter
            .device_addresses()
            .await
            .map_err(|e| RfcommError::DiscoveryFailed(e.to_string()))?;

        let mut paired = Vec::new();
        for address in addresses {
            let Ok(device) = self.adapter.device(address) else {
                continue;
            };
            if device.is_paired().await.unwrap_or(false) {
                paired.push(describe(&device).await);
            }
        }
        Ok(paired)
    }

    /// Scan for nearby devices for up to `window`
    ///
    /// Ends early when [`Radio::cancel_discovery`] is called, which the
    /// connection manager does before every dial.
    pub async fn discover(&self, window: Duration) -> Result<Vec<PeerDevice>> {
        let token = CancellationToken::new();
        if let Ok(mut slot) = self.discovery.lock() {
            if let Some(previous) = slot.replace(token.clone()) {
                previous.cancel();
            }
        }

        let events = self
            .adapter
            .discover_devices()
            .await
            .map_err(|e| RfcommError::DiscoveryFailed(e.to_string()))?;
        futures::pin_mut!(events);

        info!("Scanning for devices on {}", self.adapter.name());
        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);

        let mut found: Vec<PeerDevice> = Vec::new();
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Discovery cancelled");
                    break;
                }
                _ = &mut deadline => break,
                event = events.next() => match event {
                    Some(AdapterEvent::DeviceAdded(address)) => {
                        let Ok(device) = self.adapter.device(address) else {
                            continue;
                        };
                        let peer = describe(&device).await;
                        if !found.iter().any(|known| known.address == peer.address) {
                            debug!("Found device {}", peer);
                            found.push(peer);
                        }
                    }
                    Some(_) => {}
                    None => break,
                },
            }
        }

        // A newer scan keeps its own token in the slot
        token.cancel();
        if let Ok(mut slot) = self.discovery.lock() {
            if slot.as_ref().is_some_and(CancellationToken::is_cancelled) {
                slot.take();
            }
        }
        Ok(found)
    }

    fn profile(&self, service: &ServiceIdentity, role: Role) -> Profile {
        Profile {
            uuid: service.uuid,
            name: Some(service.name.to_string()),
            role: Some(role),
            require_authentication: Some(self.config.require_authentication),
            require_authorization: Some(self.config.require_authorization),
            auto_connect: Some(false),
            ..Default::default()
        }
    }

    async fn register(&self, service: &ServiceIdentity, role: Role) -> Result<ProfileHandle> {
        self.session
            .register_profile(self.profile(service, role))
            .await
            .map_err(|e| RfcommError::ProfileRegistration {
                uuid: service.uuid,
                reason: e.to_string(),
            })
    }

    async fn ensure_powered(&self) -> Result<()> {
        if self.is_powered().await? {
            Ok(())
        } else {
            Err(RfcommError::AdapterPoweredOff {
                adapter: self.adapter.name().to_string(),
            })
        }
    }
}

#[async_trait]
impl Radio for RfcommRadio {
    async fn listen(&self, service: &ServiceIdentity) -> io::Result<Box<dyn ServiceListener>> {
        self.ensure_powered().await?;
        let handle = self.register(service, Role::Server).await?;
        info!("Registered {} server profile on {}", service, self.adapter.name());

        Ok(Box::new(RfcommListener {
            uuid: service.uuid,
            handle: Box::pin(handle),
        }))
    }

    async fn open_socket(
        &self,
        peer: &PeerDevice,
        service: &ServiceIdentity,
    ) -> io::Result<Box<dyn OutboundSocket>> {
        self.ensure_powered().await?;
        let device = self
            .adapter
            .device(to_bluer(peer.address))
            .map_err(|e| RfcommError::ConnectFailed {
                address: peer.address,
                reason: e.to_string(),
            })?;
        let handle = self.register(service, Role::Client).await?;

        Ok(Box::new(RfcommSocket {
            device,
            uuid: service.uuid,
            handle: Box::pin(handle),
        }))
    }

    fn cancel_discovery(&self) {
        if let Ok(mut slot) = self.discovery.lock() {
            if let Some(token) = slot.take() {
                token.cancel();
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Listener and Socket
// ----------------------------------------------------------------------------

struct RfcommListener {
    uuid: Uuid,
    handle: Pin<Box<ProfileHandle>>,
}

#[async_trait]
impl ServiceListener for RfcommListener {
    async fn accept(&mut self) -> io::Result<(BoxedStream, PeerAddress)> {
        let request = self
            .handle
            .next()
            .await
            .ok_or(RfcommError::ProfileClosed { uuid: self.uuid })?;

        let address = from_bluer(request.device());
        debug!("Connection request from {}", address);

        let stream = request.accept().map_err(|e| RfcommError::AcceptFailed {
            address,
            reason: e.to_string(),
        })?;
        Ok((Box::new(RfcommLink::new(stream, None)), address))
    }
}

struct RfcommSocket {
    device: Device,
    uuid: Uuid,
    handle: Pin<Box<ProfileHandle>>,
}

#[async_trait]
impl OutboundSocket for RfcommSocket {
    async fn connect(self: Box<Self>) -> io::Result<BoxedStream> {
        let RfcommSocket {
            device,
            uuid,
            mut handle,
        } = *self;
        let target = device.address();
        let address = from_bluer(target);

        // BlueZ only finishes ConnectProfile once the request is accepted
        let connect = device.connect_profile(&uuid);
        tokio::pin!(connect);
        let mut profile_connected = false;

        let request = loop {
            tokio::select! {
                result = &mut connect, if !profile_connected => {
                    result.map_err(|e| RfcommError::ConnectFailed {
                        address,
                        reason: e.to_string(),
                    })?;
                    profile_connected = true;
                }
                request = handle.next() => match request {
                    Some(request) if request.device() == target => break request,
                    Some(request) => {
                        debug!("Rejecting unexpected request from {}", request.device());
                        request.reject(ReqError::Rejected);
                    }
                    None => return Err(RfcommError::ProfileClosed { uuid }.into()),
                },
            }
        };

        let stream = request.accept().map_err(|e| RfcommError::ConnectFailed {
            address,
            reason: e.to_string(),
        })?;
        if !profile_connected {
            if let Err(e) = connect.await {
                debug!("ConnectProfile to {} reported after accept: {}", address, e);
            }
        }

        info!("RFCOMM link to {} established", address);
        Ok(Box::new(RfcommLink::new(stream, Some(handle))))
    }
}

// ----------------------------------------------------------------------------
// Stream
// ----------------------------------------------------------------------------

/// Connected RFCOMM stream, holding the client profile registration open
struct RfcommLink {
    stream: Pin<Box<Stream>>,
    _profile: Option<Pin<Box<ProfileHandle>>>,
}

impl RfcommLink {
    fn new(stream: Stream, profile: Option<Pin<Box<ProfileHandle>>>) -> Self {
        Self {
            stream: Box::pin(stream),
            _profile: profile,
        }
    }
}

impl AsyncRead for RfcommLink {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.stream.as_mut().poll_read(cx, buf)
    }
}

impl AsyncWrite for RfcommLink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.stream.as_mut().poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.stream.as_mut().poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.stream.as_mut().poll_shutdown(cx)
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

fn to_bluer(address: PeerAddress) -> Address {
    Address::new(*address.as_bytes())
}

fn from_bluer(address: Address) -> PeerAddress {
    PeerAddress::new(address.0)
}

async fn describe(device: &Device) -> PeerDevice {
    let address = from_bluer(device.address());
    let name = device.name().await.ok().flatten().unwrap_or_default();
    PeerDevice::new(address.to_string(), name, address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_conversion_keeps_byte_order() {
        let address: PeerAddress = "00:1A:7D:DA:71:13".parse().unwrap();
        let converted = to_bluer(address);

        assert_eq!(converted.to_string(), "00:1A:7D:DA:71:13");
        assert_eq!(from_bluer(converted), address);
    }
}
