use tracing::{debug, info};

use crate::meter::{Link, MeterHandle, Meters, ReadRequest};
use crate::Error;

/// Finds the first of `candidates` on which `meter` answers a current read and leaves the meter bound to it.
///
/// Candidates after the first success are not tried. On failure the meter is left unbound and the returned
/// [`Error::MeterNotFound`] names it.
pub async fn resolve<L: Link>(meter: &mut MeterHandle<L>, candidates: &[String]) -> crate::Result<String> {
    for port in candidates {
        meter.bind(port.as_str());
        match meter.read_once(ReadRequest::CURRENT).await {
            Ok(_) => {
                info!(meter = %meter.identity(), port, "found meter");
                return Ok(port.clone());
            }
            Err(error) => debug!(meter = %meter.identity(), port, %error, "not on this port"),
        }
    }

    meter.unbind();
    let identity = meter.identity();
    Err(Error::MeterNotFound {
        role: identity.role(),
        address: identity.address(),
        ports: candidates.to_vec(),
    })
}

/// Resolves every meter in a fixed order against the full candidate list. Several meters may end up on one port,
/// as on a shared RS-485 bus.
pub async fn resolve_all<L: Link>(meters: &mut Meters<L>, candidates: &[String]) -> crate::Result<()> {
    for meter in meters.in_order() {
        resolve(meter, candidates).await?;
    }
    Ok(())
}
