use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use crc::{Crc, CRC_16_XMODEM};

pub(crate) const ACK: u8 = 0x06;
pub(crate) const NAK: u8 = 0x21;
pub(crate) const CANCEL: u8 = 0x18;
pub(crate) const ESC: u8 = 0x1B;

/// Line terminator of textual console replies.
pub(crate) const LINE_END: &[u8] = b"\n\r";

pub(crate) const EEPROM_LOCATION: u16 = 0x0B;
pub(crate) const EEPROM_SETUP_BITS: u16 = 0x2B;
pub(crate) const EEPROM_ARCHIVE_PERIOD: u16 = 0x2D;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

pub(crate) fn crc16(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

/// True when `block` ends with a valid big-endian CRC over the preceding bytes.
pub(crate) fn check_crc(block: &[u8]) -> bool {
    block.len() >= 2 && crc16(block) == 0
}

pub(crate) fn with_crc(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 2);
    out.extend_from_slice(data);
    out.extend_from_slice(&crc16(data).to_be_bytes());
    out
}

pub(crate) fn eeprom_read_command(address: u16, len: u8) -> String {
    format!("EEBRD {address:02X} {len:02X}\n")
}

pub(crate) fn eeprom_write_command(address: u16, len: u8) -> String {
    format!("EEBWR {address:02X} {len:02X}\n")
}

/// DMPAFT stamp: date then time, little-endian, followed by a CRC.
pub(crate) fn archive_stamp(since: NaiveDateTime) -> Vec<u8> {
    let date = since.day() as u16 + since.month() as u16 * 32 + ((since.year() - 2000).max(0) as u16) * 512;
    let time = since.hour() as u16 * 100 + since.minute() as u16;
    let mut data = Vec::with_capacity(4);
    data.extend_from_slice(&date.to_le_bytes());
    data.extend_from_slice(&time.to_le_bytes());
    with_crc(&data)
}

pub(crate) fn decode_archive_date(raw: u16) -> Option<NaiveDate> {
    let day = u32::from(raw & 0x1F);
    let month = u32::from((raw >> 5) & 0x0F);
    let year = 2000 + i32::from(raw >> 9);
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Storm start: month in bits 15..12, day in 11..7, years since 2000 in 6..0.
pub(crate) fn decode_storm_date(raw: u16) -> Option<NaiveDate> {
    if raw == 0xFFFF {
        return None;
    }
    let month = u32::from(raw >> 12);
    let day = u32::from((raw >> 7) & 0x1F);
    let year = 2000 + i32::from(raw & 0x7F);
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Clock value encoded as `hour * 100 + minute`.
pub(crate) fn decode_hhmm(raw: u16) -> Option<NaiveTime> {
    if raw == 0xFFFF {
        return None;
    }
    NaiveTime::from_hms_opt(u32::from(raw / 100), u32::from(raw % 100), 0)
}

/// GETTIME/SETTIME payload with CRC.
pub(crate) fn encode_console_time(time: NaiveDateTime) -> Vec<u8> {
    let data = [
        time.second() as u8,
        time.minute() as u8,
        time.hour() as u8,
        time.day() as u8,
        time.month() as u8,
        (time.year() - 1900).clamp(0, 255) as u8,
    ];
    with_crc(&data)
}

pub(crate) fn decode_console_time(data: &[u8]) -> Option<NaiveDateTime> {
    let [sec, min, hour, day, month, year, ..] = *data else {
        return None;
    };
    let date = NaiveDate::from_ymd_opt(1900 + i32::from(year), u32::from(month), u32::from(day))?;
    let time = NaiveTime::from_hms_opt(u32::from(hour), u32::from(min), u32::from(sec))?;
    Some(NaiveDateTime::new(date, time))
}

/// Upper-case hex with the bytes separated by spaces.
pub(crate) fn to_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
