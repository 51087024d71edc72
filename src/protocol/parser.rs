//! Binary record decoding for device frames.
//!
//! Every function takes the payload that follows the opcode byte. Short or
//! malformed payloads fail with a [`DecodeError`]; nothing here panics on
//! truncated input.

use std::io::Cursor;

use bytes::{Buf, Bytes};

use crate::config::FirmwareProfile;
use crate::error::{DecodeError, FirmwareErrorCode};
use crate::types::contact::{MAX_NAME_LEN, MAX_PATH_LEN, PUBLIC_KEY_LEN, PUBLIC_KEY_PREFIX_LEN};
use crate::types::{
    Acknowledgment, BatteryStatus, ChannelMessage, Contact, ContactFlags, ContactMessage,
    ContactType, DeviceInfo, DeviceStatus, MessageSent, PathLen, PublicKey, RadioConfig,
    RawRadioFrame, SelfInfo, SignalQuality, TelemetryMode, TelemetryReport, TextType,
};

/// Coordinate scaling factor (wire value is degrees × 1e6).
pub(crate) const COORD_SCALE: f64 = 1_000_000.0;

/// Size of a contact record on the wire.
pub const CONTACT_RECORD_LEN: usize = 147;

/// Minimum size of a self-info record (everything before the name).
pub const SELF_INFO_MIN_LEN: usize = 57;

/// Minimum size of a status response.
pub const STATUS_MIN_LEN: usize = 55;

/// Device info length at which firmware-gated fields are present.
const DEVICE_INFO_FULL_LEN: usize = 79;

/// Signal-quality prefix on v3 message frames (snr + 2 reserved).
const SIGNAL_PREFIX_LEN: usize = 3;

/// Raw radio SNR is always reported in quarter dB.
const RAW_SNR_DIVISOR: f32 = 4.0;

const fn ensure_len(what: &'static str, data: &[u8], expected: usize) -> Result<(), DecodeError> {
    if data.len() < expected {
        return Err(DecodeError::TooShort {
            what,
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

/// Decodes a NUL-padded fixed-width string field.
fn fixed_str(field: &'static str, data: &[u8]) -> Result<String, DecodeError> {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    std::str::from_utf8(&data[..end])
        .map(str::to_owned)
        .map_err(|_| DecodeError::InvalidUtf8 { field })
}

fn text(field: &'static str, data: &[u8]) -> Result<String, DecodeError> {
    std::str::from_utf8(data)
        .map(str::to_owned)
        .map_err(|_| DecodeError::InvalidUtf8 { field })
}

fn coord(raw: i32) -> f64 {
    f64::from(raw) / COORD_SCALE
}

fn take_key(cursor: &mut Cursor<&[u8]>) -> PublicKey {
    let mut key = [0u8; PUBLIC_KEY_LEN];
    cursor.copy_to_slice(&mut key);
    PublicKey::new(key)
}

fn take_prefix(cursor: &mut Cursor<&[u8]>) -> [u8; PUBLIC_KEY_PREFIX_LEN] {
    let mut prefix = [0u8; PUBLIC_KEY_PREFIX_LEN];
    cursor.copy_to_slice(&mut prefix);
    prefix
}

fn rest<'a>(data: &'a [u8], cursor: &Cursor<&[u8]>) -> &'a [u8] {
    let pos = usize::try_from(cursor.position()).unwrap_or(data.len());
    &data[pos.min(data.len())..]
}

/// Parses the optional u32 carried by an OK response.
#[must_use]
pub fn parse_ok(data: &[u8]) -> Option<u32> {
    (data.len() >= 4).then(|| u32::from_le_bytes([data[0], data[1], data[2], data[3]]))
}

/// Parses the optional error code of an error response (firmware 1.4+).
#[must_use]
pub fn parse_error(data: &[u8]) -> Option<FirmwareErrorCode> {
    data.first().copied().map(FirmwareErrorCode::from_byte)
}

/// Parses the contact count announced by a contacts-start frame.
#[must_use]
pub fn parse_contacts_start(data: &[u8]) -> Option<u32> {
    parse_ok(data)
}

/// Parses a fixed-layout contact record.
///
/// Format:
/// ```text
/// [pubkey:32] [type:1] [flags:1] [path_len:1] [path:64]
/// [name:32] [last_advert:4LE] [lat:4LE] [lon:4LE] [lastmod:4LE]
/// ```
///
/// # Errors
///
/// Fails on a short record, a path length above 64 or a non UTF-8 name.
pub fn parse_contact(data: &[u8], profile: FirmwareProfile) -> Result<Contact, DecodeError> {
    ensure_len("contact", data, CONTACT_RECORD_LEN)?;

    let mut cursor = Cursor::new(data);
    let public_key = take_key(&mut cursor);
    let contact_type = ContactType::from_byte(cursor.get_u8());
    let flags = ContactFlags::from_byte(cursor.get_u8());
    let raw_path_len = cursor.get_u8();

    let mut path = [0u8; MAX_PATH_LEN];
    cursor.copy_to_slice(&mut path);

    let (out_path_len, out_path) = match profile.path_sentinel.decode(raw_path_len) {
        None => (PathLen::Flood, Bytes::new()),
        Some(len) if usize::from(len) > MAX_PATH_LEN => {
            return Err(DecodeError::OutOfRange {
                field: "out_path_len",
                value: i64::from(len),
            });
        }
        Some(len) => (
            PathLen::Direct(len),
            Bytes::copy_from_slice(&path[..usize::from(len)]),
        ),
    };

    let mut name = [0u8; MAX_NAME_LEN];
    cursor.copy_to_slice(&mut name);
    let adv_name = fixed_str("adv_name", &name)?;

    let last_advert = cursor.get_u32_le();
    let adv_lat = coord(cursor.get_i32_le());
    let adv_lon = coord(cursor.get_i32_le());
    let lastmod = cursor.get_u32_le();

    Ok(Contact {
        public_key,
        contact_type,
        flags,
        out_path_len,
        out_path,
        adv_name,
        last_advert,
        adv_lat,
        adv_lon,
        lastmod,
    })
}

/// Parses `SelfInfo` from the handshake response.
///
/// Format:
/// ```text
/// [adv_type:1] [tx_power:1] [max_tx_power:1] [pubkey:32] [lat:4LE] [lon:4LE]
/// [multi_acks:1] [adv_loc_policy:1] [telemetry_mode:1] [manual_add:1]
/// [freq:4LE] [bw:4LE] [sf:1] [cr:1] [name:...]
/// ```
///
/// # Errors
///
/// Fails if the record is shorter than [`SELF_INFO_MIN_LEN`] or the name is
/// not UTF-8.
pub fn parse_self_info(data: &[u8]) -> Result<SelfInfo, DecodeError> {
    ensure_len("self info", data, SELF_INFO_MIN_LEN)?;

    let mut cursor = Cursor::new(data);
    let adv_type = cursor.get_u8();
    let tx_power = cursor.get_u8();
    let max_tx_power = cursor.get_u8();
    let public_key = take_key(&mut cursor);
    let adv_lat = coord(cursor.get_i32_le());
    let adv_lon = coord(cursor.get_i32_le());
    let multi_acks = cursor.get_u8();
    let advert_loc_policy = cursor.get_u8();
    let telemetry_mode = TelemetryMode::from_byte(cursor.get_u8());
    let manual_add_contacts = cursor.get_u8() != 0;
    let freq_raw = cursor.get_u32_le();
    let bw_raw = cursor.get_u32_le();
    let spreading_factor = cursor.get_u8();
    let coding_rate = cursor.get_u8();
    let name = fixed_str("name", rest(data, &cursor))?;

    Ok(SelfInfo {
        adv_type,
        tx_power,
        max_tx_power,
        public_key,
        adv_lat,
        adv_lon,
        multi_acks,
        advert_loc_policy,
        telemetry_mode,
        manual_add_contacts,
        radio: RadioConfig {
            frequency_mhz: f64::from(freq_raw) / 1000.0,
            bandwidth_khz: f64::from(bw_raw) / 1000.0,
            spreading_factor,
            coding_rate,
        },
        name,
        device: None,
    })
}

/// Parses `DeviceInfo` from a device query response.
///
/// Format:
/// ```text
/// [fw_ver:1] (if >= 3: [max_contacts/2:1] [max_channels:1] [ble_pin:4LE]
/// [build:12] [model:40] [ver:20])
/// ```
///
/// # Errors
///
/// Fails on an empty payload or non UTF-8 strings.
pub fn parse_device_info(data: &[u8]) -> Result<DeviceInfo, DecodeError> {
    ensure_len("device info", data, 1)?;
    let firmware_version = data[0];

    if firmware_version < 3 || data.len() < DEVICE_INFO_FULL_LEN {
        return Ok(DeviceInfo {
            firmware_version,
            max_contacts: None,
            max_channels: None,
            ble_pin: None,
            fw_build: None,
            model: None,
            ver: None,
        });
    }

    let mut cursor = Cursor::new(&data[1..7]);
    let max_contacts = u16::from(cursor.get_u8()) * 2;
    let max_channels = cursor.get_u8();
    let ble_pin = cursor.get_u32_le();

    Ok(DeviceInfo {
        firmware_version,
        max_contacts: Some(max_contacts),
        max_channels: Some(max_channels),
        ble_pin: Some(ble_pin),
        fw_build: Some(fixed_str("fw_build", &data[7..19])?),
        model: Some(fixed_str("model", &data[19..59])?),
        ver: Some(fixed_str("ver", &data[59..79])?),
    })
}

/// Parses the message-sent confirmation.
///
/// Format: `[type:1] [expected_ack:4LE] [suggested_timeout:4LE]`
///
/// # Errors
///
/// Fails if the payload is shorter than 9 bytes.
pub fn parse_message_sent(data: &[u8]) -> Result<MessageSent, DecodeError> {
    ensure_len("message sent", data, 9)?;
    let mut buf = data;
    Ok(MessageSent {
        kind: buf.get_u8(),
        expected_ack: buf.get_u32_le(),
        suggested_timeout_ms: buf.get_u32_le(),
    })
}

fn parse_signal(
    cursor: &mut Cursor<&[u8]>,
    v3: bool,
    profile: FirmwareProfile,
) -> Option<SignalQuality> {
    if !v3 {
        return None;
    }
    let snr_raw = cursor.get_i8();
    cursor.advance(2);
    Some(SignalQuality {
        snr: profile.snr_scale.apply(i16::from(snr_raw)),
    })
}

/// Parses `ContactMessage` from a fetch-next-message response.
///
/// Format (v1):
/// ```text
/// [pubkey_prefix:6] [path_len:1] [txt_type:1] [timestamp:4LE]
/// (if txt_type==2: [signature:4]) [text...]
/// ```
///
/// Format (v3, with signal):
/// ```text
/// [snr:1] [reserved:2] [pubkey_prefix:6] [path_len:1] [txt_type:1] [timestamp:4LE]
/// (if txt_type==2: [signature:4]) [text...]
/// ```
///
/// # Errors
///
/// Fails on a short payload, a signed message missing its signature, or
/// non UTF-8 text.
pub fn parse_contact_message(
    data: &[u8],
    v3: bool,
    profile: FirmwareProfile,
) -> Result<ContactMessage, DecodeError> {
    let header = PUBLIC_KEY_PREFIX_LEN + 6 + if v3 { SIGNAL_PREFIX_LEN } else { 0 };
    ensure_len("contact message", data, header)?;

    let mut cursor = Cursor::new(data);
    let signal = parse_signal(&mut cursor, v3, profile);
    let sender_prefix = take_prefix(&mut cursor);
    let path_len = PathLen::from_hops(profile.path_sentinel.decode(cursor.get_u8()));
    let text_type = TextType::from_byte(cursor.get_u8());
    let timestamp = cursor.get_u32_le();

    let signature = if text_type == TextType::Signed {
        ensure_len("signed contact message", data, header + 4)?;
        let mut sig = [0u8; 4];
        cursor.copy_to_slice(&mut sig);
        Some(sig)
    } else {
        None
    };

    Ok(ContactMessage {
        sender_prefix,
        path_len,
        text_type,
        timestamp,
        signature,
        text: text("text", rest(data, &cursor))?,
        signal,
    })
}

/// Parses `ChannelMessage` from a fetch-next-message response.
///
/// Format (v1):
/// ```text
/// [channel_idx:1] [path_len:1] [txt_type:1] [timestamp:4LE] [text...]
/// ```
///
/// Format (v3, with signal):
/// ```text
/// [snr:1] [reserved:2] [channel_idx:1] [path_len:1] [txt_type:1] [timestamp:4LE] [text...]
/// ```
///
/// # Errors
///
/// Fails on a short payload or non UTF-8 text.
pub fn parse_channel_message(
    data: &[u8],
    v3: bool,
    profile: FirmwareProfile,
) -> Result<ChannelMessage, DecodeError> {
    let header = 7 + if v3 { SIGNAL_PREFIX_LEN } else { 0 };
    ensure_len("channel message", data, header)?;

    let mut cursor = Cursor::new(data);
    let signal = parse_signal(&mut cursor, v3, profile);
    let channel_index = cursor.get_u8();
    let path_len = PathLen::from_hops(profile.path_sentinel.decode(cursor.get_u8()));
    let text_type = TextType::from_byte(cursor.get_u8());
    let timestamp = cursor.get_u32_le();

    Ok(ChannelMessage {
        channel_index,
        path_len,
        text_type,
        timestamp,
        text: text("text", rest(data, &cursor))?,
        signal,
    })
}

/// Parses the device's current time.
///
/// # Errors
///
/// Fails if fewer than 4 bytes are present.
pub fn parse_current_time(data: &[u8]) -> Result<u32, DecodeError> {
    ensure_len("current time", data, 4)?;
    Ok(u32::from_le_bytes([data[0], data[1], data[2], data[3]]))
}

/// Formats an exported contact card as a `meshcore://` URI.
#[must_use]
pub fn parse_contact_uri(data: &[u8]) -> String {
    format!("meshcore://{}", hex::encode(data))
}

/// Parses `BatteryStatus`.
///
/// Format:
/// ```text
/// [millivolts:2LE] (optional: [used_kb:4LE] [total_kb:4LE])
/// ```
///
/// # Errors
///
/// Fails if the voltage is missing.
pub fn parse_battery(data: &[u8]) -> Result<BatteryStatus, DecodeError> {
    ensure_len("battery", data, 2)?;

    let mut buf = data;
    let millivolts = buf.get_u16_le();
    let (used_kb, total_kb) = if buf.remaining() >= 8 {
        (Some(buf.get_u32_le()), Some(buf.get_u32_le()))
    } else {
        (None, None)
    };

    Ok(BatteryStatus {
        millivolts,
        used_kb,
        total_kb,
    })
}

/// Parses the public key carried by advert and path-update pushes.
///
/// # Errors
///
/// Fails if fewer than 32 bytes are present.
pub fn parse_push_key(data: &[u8]) -> Result<PublicKey, DecodeError> {
    ensure_len("push key", data, PUBLIC_KEY_LEN)?;
    let mut cursor = Cursor::new(data);
    Ok(take_key(&mut cursor))
}

/// Parses an ACK push.
#[must_use]
pub fn parse_ack(data: &[u8]) -> Acknowledgment {
    Acknowledgment {
        code: parse_ok(data),
    }
}

/// Parses a raw radio frame report.
///
/// Format: `[snr:1 signed, quarter dB] [rssi:1 signed] [reserved:1] [payload...]`
///
/// # Errors
///
/// Fails if the header is incomplete.
pub fn parse_raw_data(data: &[u8]) -> Result<RawRadioFrame, DecodeError> {
    ensure_len("raw data", data, 3)?;
    let mut buf = data;
    let snr = f32::from(buf.get_i8()) / RAW_SNR_DIVISOR;
    let rssi = buf.get_i8();
    buf.advance(1);

    Ok(RawRadioFrame {
        snr,
        rssi,
        payload: Bytes::copy_from_slice(buf),
    })
}

/// Parses `DeviceStatus` from a status response.
///
/// Format:
/// ```text
/// [reserved:1] [pubkey_prefix:6] [battery:2LE] [tx_queue:2LE] [free_queue:2LE]
/// [last_rssi:2LESigned] [nb_recv:4LE] [nb_sent:4LE] [airtime:4LE] [uptime:4LE]
/// [sent_flood:4LE] [sent_direct:4LE] [recv_flood:4LE] [recv_direct:4LE]
/// [full_evts:2LE] [last_snr:2LESigned/4] [direct_dups:2LE] [flood_dups:2LE]
/// ([rx_airtime:4LE])
/// ```
///
/// # Errors
///
/// Fails if the fixed part is incomplete.
pub fn parse_status(data: &[u8]) -> Result<DeviceStatus, DecodeError> {
    ensure_len("status", data, STATUS_MIN_LEN)?;

    let mut cursor = Cursor::new(data);
    cursor.advance(1);
    let pubkey_prefix = take_prefix(&mut cursor);

    let battery_mv = cursor.get_u16_le();
    let tx_queue_len = cursor.get_u16_le();
    let free_queue_len = cursor.get_u16_le();
    let last_rssi = cursor.get_i16_le();
    let packets_received = cursor.get_u32_le();
    let packets_sent = cursor.get_u32_le();
    let airtime_secs = cursor.get_u32_le();
    let uptime_secs = cursor.get_u32_le();
    let sent_flood = cursor.get_u32_le();
    let sent_direct = cursor.get_u32_le();
    let recv_flood = cursor.get_u32_le();
    let recv_direct = cursor.get_u32_le();
    let full_events = cursor.get_u16_le();
    let last_snr = f32::from(cursor.get_i16_le()) / RAW_SNR_DIVISOR;
    let direct_dups = cursor.get_u16_le();
    let flood_dups = cursor.get_u16_le();
    let rx_airtime_secs = (cursor.remaining() >= 4).then(|| cursor.get_u32_le());

    Ok(DeviceStatus {
        pubkey_prefix,
        battery_mv,
        tx_queue_len,
        free_queue_len,
        last_rssi,
        packets_received,
        packets_sent,
        airtime_secs,
        uptime_secs,
        sent_flood,
        sent_direct,
        recv_flood,
        recv_direct,
        full_events,
        last_snr,
        direct_dups,
        flood_dups,
        rx_airtime_secs,
    })
}

/// Parses a telemetry response.
///
/// Format: `[reserved:1] [pubkey_prefix:6] [lpp...]`
///
/// # Errors
///
/// Fails if the sender prefix is incomplete.
pub fn parse_telemetry(data: &[u8]) -> Result<TelemetryReport, DecodeError> {
    ensure_len("telemetry", data, 1 + PUBLIC_KEY_PREFIX_LEN)?;
    let mut cursor = Cursor::new(data);
    cursor.advance(1);
    let pubkey_prefix = take_prefix(&mut cursor);

    Ok(TelemetryReport {
        pubkey_prefix,
        lpp: Bytes::copy_from_slice(rest(data, &cursor)),
    })
}
