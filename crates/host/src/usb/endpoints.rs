//! Endpoint discovery for a claimed HID interface

use protocol::{EndpointPair, HidError, InterfaceDescriptor};
use tracing::debug;

/// Pick the interrupt IN/OUT endpoints used for HID reports
///
/// The first matching endpoint in descriptor order wins for each direction.
/// Only already-retrieved interface metadata is inspected.
pub fn discover(interface: &InterfaceDescriptor) -> Result<EndpointPair, HidError> {
    debug!(
        "Interface {}: class={:#x} subclass={:#x} protocol={:#x} endpoints={}",
        interface.number,
        interface.class_code,
        interface.sub_class_code,
        interface.protocol_code,
        interface.endpoints.len()
    );

    let in_endpoint = interface.endpoints.iter().find(|ep| ep.is_interrupt_in());
    let out_endpoint = interface.endpoints.iter().find(|ep| ep.is_interrupt_out());

    match (in_endpoint, out_endpoint) {
        (Some(in_endpoint), Some(out_endpoint)) => {
            debug!(
                "Found IN endpoint {:#04x} ({} bytes), OUT endpoint {:#04x} ({} bytes)",
                in_endpoint.address,
                in_endpoint.max_packet_size,
                out_endpoint.address,
                out_endpoint.max_packet_size
            );
            Ok(EndpointPair {
                in_endpoint: *in_endpoint,
                out_endpoint: *out_endpoint,
            })
        }
        _ => Err(HidError::EndpointsNotFound {
            interface: interface.number,
        }),
    }
}
