//! Render raw frames into the summary/detail text carried by [`Packet`].

use etherparse::{InternetSlice, LinkSlice, SlicedPacket, TransportSlice};
use std::fmt::Write;

use crate::packet::Packet;

/// Bytes of the frame included in the detail hex dump.
const MAX_DUMP_BYTES: usize = 256;

/// Linux cooked capture (SLL) header length; the protocol type is in the
/// last two bytes.
const SLL_HEADER_LEN: usize = 16;

/// BSD loopback header: a 4-byte address family.
const LOOPBACK_HEADER_LEN: usize = 4;

/// Link-layer framing of a capture handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLayer {
    Ethernet,
    /// Raw IPv4/IPv6 with no link header.
    Ip,
    /// Linux cooked capture, used by the `any` device.
    LinuxSll,
    /// BSD null/loopback encapsulation.
    Loopback,
    Other,
}

impl LinkLayer {
    /// Map a pcap DLT value.
    pub fn from_linktype(dlt: i32) -> Self {
        match dlt {
            1 => LinkLayer::Ethernet,
            12 | 14 | 101 | 228 | 229 => LinkLayer::Ip,
            113 => LinkLayer::LinuxSll,
            0 | 108 => LinkLayer::Loopback,
            _ => LinkLayer::Other,
        }
    }
}

/// Render one captured frame. Never fails: frames that cannot be sliced are
/// rendered as `RAW len=<n>` with a hex dump.
pub fn render_frame(link: LinkLayer, wire_len: u32, data: &[u8]) -> Packet {
    let mut detail = String::new();
    let _ = writeln!(
        detail,
        "Frame: {} bytes on wire, {} captured",
        wire_len,
        data.len()
    );

    let sliced = match link {
        LinkLayer::Ethernet => SlicedPacket::from_ethernet(data).ok(),
        LinkLayer::Ip => SlicedPacket::from_ip(data).ok(),
        LinkLayer::LinuxSll => {
            if data.len() >= SLL_HEADER_LEN {
                let proto = u16::from_be_bytes([data[14], data[15]]);
                let _ = writeln!(detail, "Linux cooked capture: protocol 0x{:04x}", proto);
            }
            data.get(SLL_HEADER_LEN..)
                .and_then(|ip| SlicedPacket::from_ip(ip).ok())
        }
        LinkLayer::Loopback => data
            .get(LOOPBACK_HEADER_LEN..)
            .and_then(|ip| SlicedPacket::from_ip(ip).ok()),
        LinkLayer::Other => None,
    };

    let summary = match sliced {
        Some(sliced) => describe(&sliced, wire_len, &mut detail),
        None => format!("RAW len={}", wire_len),
    };

    let dump_len = data.len().min(MAX_DUMP_BYTES);
    detail.push_str(&format_hex_dump(&data[..dump_len]));
    if dump_len < data.len() {
        let _ = writeln!(detail, "... ({} bytes remaining)", data.len() - dump_len);
    }

    Packet::new(summary, detail)
}

fn describe(sliced: &SlicedPacket<'_>, wire_len: u32, detail: &mut String) -> String {
    let mut proto = String::from("ETH");
    let mut src = String::from("?");
    let mut dst = String::from("?");
    let mut src_port: Option<u16> = None;
    let mut dst_port: Option<u16> = None;
    let mut extra = String::new();

    if let Some(LinkSlice::Ethernet2(eth)) = &sliced.link {
        let _ = writeln!(
            detail,
            "Ethernet: {} → {}, type 0x{:04x}",
            format_mac(&eth.source()),
            format_mac(&eth.destination()),
            eth.ether_type()
        );
        src = format_mac(&eth.source());
        dst = format_mac(&eth.destination());
        if eth.ether_type() == 0x0806 {
            proto = "ARP".into();
        }
    }

    if let Some(ip) = &sliced.ip {
        match ip {
            InternetSlice::Ipv4(h, _) => {
                proto = "IPv4".into();
                src = h.source_addr().to_string();
                dst = h.destination_addr().to_string();
                let _ = writeln!(detail, "IPv4: {} → {}, ttl {}", src, dst, h.ttl());
            }
            InternetSlice::Ipv6(h, _) => {
                proto = "IPv6".into();
                src = h.source_addr().to_string();
                dst = h.destination_addr().to_string();
                let _ = writeln!(detail, "IPv6: {} → {}, hop limit {}", src, dst, h.hop_limit());
            }
        }
    }

    if let Some(transport) = &sliced.transport {
        match transport {
            TransportSlice::Tcp(h) => {
                proto = "TCP".into();
                src_port = Some(h.source_port());
                dst_port = Some(h.destination_port());
                let mut flags = Vec::new();
                for (set, name) in [
                    (h.syn(), "SYN"),
                    (h.ack(), "ACK"),
                    (h.fin(), "FIN"),
                    (h.rst(), "RST"),
                    (h.psh(), "PSH"),
                    (h.urg(), "URG"),
                ] {
                    if set {
                        flags.push(name);
                    }
                }
                extra = flags.join(" ");
                let _ = writeln!(
                    detail,
                    "TCP: Source Port: {}, Destination Port: {}, seq={} ack={} win={} [{}]",
                    h.source_port(),
                    h.destination_port(),
                    h.sequence_number(),
                    h.acknowledgment_number(),
                    h.window_size(),
                    extra
                );
            }
            TransportSlice::Udp(h) => {
                proto = "UDP".into();
                src_port = Some(h.source_port());
                dst_port = Some(h.destination_port());
                let _ = writeln!(
                    detail,
                    "UDP: Source Port: {}, Destination Port: {}, length {}",
                    h.source_port(),
                    h.destination_port(),
                    h.length()
                );
            }
            TransportSlice::Icmpv4(h) => {
                proto = "ICMP".into();
                extra = format!("type={} code={}", h.type_u8(), h.code_u8());
                let _ = writeln!(detail, "ICMP: {}", extra);
            }
            TransportSlice::Icmpv6(h) => {
                proto = "ICMPv6".into();
                extra = format!("type={} code={}", h.type_u8(), h.code_u8());
                let _ = writeln!(detail, "ICMPv6: {}", extra);
            }
            TransportSlice::Unknown(number) => {
                extra = format!("ip-proto={}", number);
            }
        }
    }

    if !sliced.payload.is_empty() {
        let _ = writeln!(detail, "Payload: {} bytes", sliced.payload.len());
    }

    let mut summary = format!(
        "{} {}→{}",
        proto,
        endpoint(&src, src_port),
        endpoint(&dst, dst_port)
    );
    if !extra.is_empty() {
        summary.push(' ');
        summary.push_str(&extra);
    }
    let _ = write!(summary, " len={}", wire_len);
    summary
}

fn endpoint(addr: &str, port: Option<u16>) -> String {
    match port {
        Some(port) if addr.contains(':') && !addr.contains('.') => format!("[{}]:{}", addr, port),
        Some(port) => format!("{}:{}", addr, port),
        None => addr.to_string(),
    }
}

fn format_mac(mac: &[u8; 6]) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}

/// Offset / hex / ASCII dump, 16 bytes per line.
fn format_hex_dump(data: &[u8]) -> String {
    let mut out = String::new();
    for (line, chunk) in data.chunks(16).enumerate() {
        let _ = write!(out, "{:04x}  ", line * 16);
        for i in 0..16 {
            match chunk.get(i) {
                Some(byte) => {
                    let _ = write!(out, "{:02x} ", byte);
                }
                None => out.push_str("   "),
            }
            if i == 7 {
                out.push(' ');
            }
        }
        out.push_str(" |");
        out.extend(chunk.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        }));
        out.push_str("|\n");
    }
    out
}
