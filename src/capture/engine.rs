//! libpcap-backed capture source: opens a live interface (or replays a
//! capture file) and yields rendered packets.

use pcap::{Active, Capture, Device, Offline};
use std::path::PathBuf;

use super::render::{self, LinkLayer};
use super::{CaptureBackend, CaptureError, CaptureSource, NextPacket, OpenOptions};

/// The pcap capture backend.
#[derive(Debug, Clone, Default)]
pub struct PcapBackend {
    /// When set, `open` replays this file instead of opening a device.
    file: Option<PathBuf>,
}

impl PcapBackend {
    pub fn live() -> Self {
        PcapBackend { file: None }
    }

    pub fn offline(path: impl Into<PathBuf>) -> Self {
        PcapBackend {
            file: Some(path.into()),
        }
    }

    fn open_live(&self, name: &str, options: &OpenOptions) -> Result<PcapSource, CaptureError> {
        // Select the device
        let device = if name.is_empty() {
            Device::lookup()
                .map_err(|e| CaptureError::NoDevice(e.to_string()))?
                .ok_or_else(|| CaptureError::NoDevice("no default device found".into()))?
        } else {
            let devices = Device::list().map_err(|e| CaptureError::List(e.to_string()))?;
            devices
                .into_iter()
                .find(|d| d.name == name)
                .ok_or_else(|| CaptureError::NoDevice(format!("interface '{}' not found", name)))?
        };

        let device_name = device.name.clone();
        let open_err = |e: pcap::Error| CaptureError::Open {
            device: device_name.clone(),
            reason: e.to_string(),
        };

        let cap = Capture::from_device(device)
            .map_err(open_err)?
            .promisc(options.promiscuous)
            .snaplen(options.snaplen)
            .timeout(options.timeout_ms)
            .open()
            .map_err(open_err)?;

        let link = LinkLayer::from_linktype(cap.get_datalink().0);

        tracing::info!(
            interface = %device_name,
            promiscuous = options.promiscuous,
            snaplen = options.snaplen,
            timeout_ms = options.timeout_ms,
            ?link,
            "capture opened"
        );

        Ok(PcapSource {
            name: device_name,
            link,
            handle: Some(Handle::Live(cap)),
        })
    }

    fn open_file(&self, path: &PathBuf) -> Result<PcapSource, CaptureError> {
        let name = path.display().to_string();
        let cap = Capture::from_file(path).map_err(|e| CaptureError::Open {
            device: name.clone(),
            reason: e.to_string(),
        })?;
        let link = LinkLayer::from_linktype(cap.get_datalink().0);

        tracing::info!(file = %name, ?link, "capture file opened");

        Ok(PcapSource {
            name,
            link,
            handle: Some(Handle::Offline(cap)),
        })
    }
}

impl CaptureBackend for PcapBackend {
    fn list_interfaces(&self) -> Result<Vec<String>, CaptureError> {
        let devices = Device::list().map_err(|e| CaptureError::List(e.to_string()))?;
        Ok(devices.into_iter().map(|d| d.name).collect())
    }

    fn open(
        &self,
        device: &str,
        options: &OpenOptions,
    ) -> Result<Box<dyn CaptureSource>, CaptureError> {
        let source = match &self.file {
            Some(path) => self.open_file(path)?,
            None => self.open_live(device, options)?,
        };
        Ok(Box::new(source))
    }
}

enum Handle {
    Live(Capture<Active>),
    Offline(Capture<Offline>),
}

/// An open pcap handle. Dropping it closes the handle.
pub struct PcapSource {
    name: String,
    link: LinkLayer,
    handle: Option<Handle>,
}

impl CaptureSource for PcapSource {
    fn next_packet(&mut self) -> Result<NextPacket, CaptureError> {
        let link = self.link;
        let result = match self.handle.as_mut() {
            Some(Handle::Live(cap)) => cap.next_packet(),
            Some(Handle::Offline(cap)) => cap.next_packet(),
            None => return Err(CaptureError::Runtime(format!("'{}' is closed", self.name))),
        };
        match result {
            Ok(packet) => Ok(NextPacket::Packet(render::render_frame(
                link,
                packet.header.len,
                packet.data,
            ))),
            Err(pcap::Error::TimeoutExpired) => Ok(NextPacket::Timeout),
            Err(pcap::Error::NoMorePackets) => Ok(NextPacket::Exhausted),
            Err(e) => Err(CaptureError::Runtime(e.to_string())),
        }
    }

    fn close(&mut self) {
        if self.handle.take().is_some() {
            tracing::debug!(source = %self.name, "pcap handle closed");
        }
    }
}

impl Drop for PcapSource {
    fn drop(&mut self) {
        self.close();
    }
}
