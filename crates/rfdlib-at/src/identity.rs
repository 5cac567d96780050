//! Firmware identification.
//!
//! Once in command mode, `ATI` returns a banner such as
//! `RFD SiK 2.75MP on RFD900xR1.1` or `RFD900 ASYNC 2.47`, and `ATI8`
//! returns the modem's unique ID as `0x` followed by 16 hex digits.

use std::sync::LazyLock;
use std::time::Duration;

use tracing::{debug, info, warn};

use rfdlib_core::error::Error;

use crate::commands::RadioVariant;
use crate::configuration::DeviceId;
use crate::error::SessionError;
use crate::line::{LineTransport, Pattern};

/// Substring every RFD900 identification banner contains.
pub const PRODUCT_MARKER: &str = "RFD900";

/// Banner query.
pub const BANNER_QUERY: &str = "ATI";

/// Unique ID query.
pub const DEVICE_ID_QUERY: &str = "ATI8";

static DEVICE_ID_PATTERN: LazyLock<Pattern> = LazyLock::new(|| {
    Pattern::regex(r"0x[0-9a-fA-F]{16}").expect("invalid device id regex")
});

/// Variant markers, checked in order.
const VARIANT_MARKERS: [(&str, RadioVariant); 2] = [
    ("ASYNC", RadioVariant::AsyncPointToPoint),
    ("MP", RadioVariant::Multipoint),
];

/// What the modem reported about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub variant: RadioVariant,
    pub device_id: DeviceId,
    /// Identification banner as received, trimmed.
    pub banner: String,
}

/// Classify an identification banner. Markers are case-sensitive.
pub fn detect_variant(banner: &str) -> Option<RadioVariant> {
    VARIANT_MARKERS
        .iter()
        .find(|(marker, _)| banner.contains(marker))
        .map(|(_, variant)| *variant)
}

/// Query and parse the modem's identity.
///
/// `timeout` bounds each query; `line_timeout` bounds the read of the rest
/// of the banner line after the product marker.
pub async fn resolve_identity(
    line: &mut LineTransport<'_>,
    timeout: Duration,
    line_timeout: Duration,
) -> Result<Identity, SessionError> {
    let (banner, reply) = read_banner(line, timeout, line_timeout).await?;
    debug!(%banner, "identification banner");

    let variant = detect_variant(&reply).ok_or_else(|| {
        warn!(%banner, "unrecognised firmware");
        SessionError::UnknownVariant {
            banner: banner.clone(),
        }
    })?;

    let device_id = read_device_id(line, timeout).await?;
    info!(%variant, %device_id, "identified modem");

    Ok(Identity {
        variant,
        device_id,
        banner,
    })
}

/// Returns the banner line and the whole reply up to the end of that line.
async fn read_banner(
    line: &mut LineTransport<'_>,
    timeout: Duration,
    line_timeout: Duration,
) -> Result<(String, String), SessionError> {
    line.send_line(BANNER_QUERY).await?;
    let m = line
        .expect(&Pattern::literal(PRODUCT_MARKER), timeout)
        .await
        .map_err(|e| query_error(e, BANNER_QUERY))?;

    // The marker may sit anywhere on the banner line; rebuild the whole line.
    let head = m.before.rsplit(['\r', '\n']).next().unwrap_or_default();
    let tail = match line.read_line(line_timeout).await {
        Ok(rest) => rest,
        Err(Error::Timeout) => line.take_pending(),
        Err(e) => return Err(e.into()),
    };
    let banner = format!("{head}{}{tail}", m.after).trim().to_string();
    let reply = format!("{}{}{tail}", m.before, m.after);
    Ok((banner, reply))
}

async fn read_device_id(
    line: &mut LineTransport<'_>,
    timeout: Duration,
) -> Result<DeviceId, SessionError> {
    line.send_line(DEVICE_ID_QUERY).await?;
    let m = line
        .expect(&DEVICE_ID_PATTERN, timeout)
        .await
        .map_err(|e| query_error(e, DEVICE_ID_QUERY))?;
    m.after.parse().map_err(|_| SessionError::IdentityTimeout {
        query: DEVICE_ID_QUERY,
    })
}

fn query_error(e: Error, query: &'static str) -> SessionError {
    match e {
        Error::Timeout => SessionError::IdentityTimeout { query },
        other => other.into(),
    }
}
