// src/overlay/port.rs

//! XVideo port reservation.

use log::{debug, info, trace, warn};
use std::rc::Rc;

use super::format::FourCc;
use crate::error::VideoError;
use crate::server::{AdaptorCaps, DisplayServer, PortId};

/// A grabbed XVideo port and the format agreed on it. Ungrabbed on drop.
#[derive(Debug)]
pub struct OverlayPort<S: DisplayServer> {
    server: Rc<S>,
    id: PortId,
    format: FourCc,
    overlay_class: bool,
    adaptor: String,
}

impl<S: DisplayServer> OverlayPort<S> {
    pub fn id(&self) -> PortId {
        self.id
    }

    pub fn format(&self) -> FourCc {
        self.format
    }

    /// True overlays serve one window at a time; texture adaptors do not.
    pub fn is_overlay_class(&self) -> bool {
        self.overlay_class
    }

    pub fn adaptor(&self) -> &str {
        &self.adaptor
    }
}

impl<S: DisplayServer> Drop for OverlayPort<S> {
    fn drop(&mut self) {
        self.server.ungrab_port(self.id);
        debug!("Released XVideo port {} ({})", self.id, self.adaptor);
    }
}

/// Formats to look for: just the requested one, or all of `acceptable`.
fn candidate_formats(requested: Option<FourCc>, acceptable: &[FourCc]) -> Vec<FourCc> {
    match requested {
        Some(f) if acceptable.contains(&f) => vec![f],
        Some(f) => {
            warn!("Requested overlay format {} is not supported", f);
            Vec::new()
        }
        None => acceptable.to_vec(),
    }
}

/// Finds and grabs a port that can show one of the candidate formats.
///
/// Adaptors are visited in server order. Within an adaptor, the formats of
/// `acceptable` are tried in the order given and the first port that can be
/// grabbed wins.
/// Once a port is held only a texture-class adaptor can replace it, in which
/// case the earlier port is released; holding a texture-class port ends the
/// search. Finding nothing is [`VideoError::HardwareUnavailable`].
pub fn negotiate<S: DisplayServer>(
    server: &Rc<S>,
    requested: Option<FourCc>,
    acceptable: &[FourCc],
) -> Result<OverlayPort<S>, VideoError> {
    let adaptors = server.query_adaptors().ok_or(VideoError::HardwareUnavailable)?;
    let candidates = candidate_formats(requested, acceptable);
    let mut held: Option<OverlayPort<S>> = None;

    for adaptor in &adaptors {
        if held.as_ref().is_some_and(|p| !p.overlay_class) {
            break;
        }
        if !adaptor.caps.contains(AdaptorCaps::INPUT | AdaptorCaps::IMAGE) {
            trace!("Skipping adaptor {:?}: no image input", adaptor.name);
            continue;
        }
        if held.is_some() && adaptor.is_overlay_class() {
            continue;
        }

        let supported = server.list_image_formats(adaptor.base_id);
        let grabbed = candidates
            .iter()
            .filter(|f| supported.contains(*f))
            .find_map(|&format| {
                adaptor
                    .ports()
                    .find(|&port| server.grab_port(port))
                    .map(|port| (port, format))
            });

        if let Some((id, format)) = grabbed {
            debug!(
                "Grabbed XVideo port {} on {:?} for {}",
                id, adaptor.name, format
            );
            if let Some(previous) = &held {
                debug!(
                    "Preferring texture adaptor {:?} over overlay port {}",
                    adaptor.name, previous.id
                );
            }
            // Assigning drops (and so ungrabs) the previously held port.
            held = Some(OverlayPort {
                server: server.clone(),
                id,
                format,
                overlay_class: adaptor.is_overlay_class(),
                adaptor: adaptor.name.clone(),
            });
        }
    }

    match held {
        Some(port) => {
            info!(
                "Using XVideo port {} ({}) with format {}",
                port.id, port.adaptor, port.format
            );
            Ok(port)
        }
        None => {
            info!("No usable XVideo port; using software scaling");
            Err(VideoError::HardwareUnavailable)
        }
    }
}
