//! Command session with a Vantage console over an open link.

use std::time::Duration;

use chrono::NaiveDateTime;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::link::Transport;
use crate::parser::{
    parse_archive_page, parse_archive_record, parse_hilows, parse_loop, ArchiveRecord, HiLows,
    LoopPacket, RawRecord, HILOWS_LEN, LOOP_PACKET_LEN, ARCHIVE_PAGE_LEN,
};
use crate::protocol::{
    archive_stamp, check_crc, decode_console_time, eeprom_read_command, eeprom_write_command,
    encode_console_time, with_crc, ACK, CANCEL, EEPROM_ARCHIVE_PERIOD, EEPROM_LOCATION,
    EEPROM_SETUP_BITS, ESC, LINE_END, NAK,
};
use crate::types::{ArchivePeriod, Diagnostics, Location, RainCollector};
use crate::{Error, Result};

const WAKE_ATTEMPTS: usize = 3;
const WAKE_TIMEOUT: Duration = Duration::from_millis(1200);
const MAX_REPLY_LEN: usize = 256;

pub struct Console {
    io: Box<dyn Transport>,
    timeout: Duration,
}

impl Console {
    pub fn new(io: Box<dyn Transport>, timeout: Duration) -> Self {
        Self { io, timeout }
    }

    pub async fn wake_up(&mut self) -> Result<()> {
        for attempt in 1..=WAKE_ATTEMPTS {
            self.write(b"\n").await?;
            let mut reply = [0u8; 2];
            match timeout(WAKE_TIMEOUT, self.io.read_exact(&mut reply)).await {
                Ok(Ok(_)) if reply == LINE_END => {
                    trace!(attempt, "console awake");
                    return Ok(());
                }
                Ok(Ok(_)) => debug!(attempt, ?reply, "unexpected wake-up reply"),
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => debug!(attempt, "wake-up timed out"),
            }
        }
        Err(Error::WakeUp)
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.io.write_all(data).await?;
        self.io.flush().await?;
        Ok(())
    }

    async fn read_exact(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        timeout(self.timeout, self.io.read_exact(&mut buf))
            .await
            .map_err(|_| Error::Timeout)??;
        Ok(buf)
    }

    async fn read_byte(&mut self) -> Result<u8> {
        Ok(self.read_exact(1).await?[0])
    }

    async fn expect_ack(&mut self, what: &str) -> Result<()> {
        match self.read_byte().await? {
            ACK => Ok(()),
            NAK => Err(Error::Nak(what.to_string())),
            CANCEL => Err(Error::Crc("data sent to console")),
            other => Err(Error::Protocol(format!(
                "expected ACK for {what}, got 0x{other:02X}"
            ))),
        }
    }

    /// Wakes the console, sends `command` and waits for its ACK.
    async fn ack_command(&mut self, command: &str) -> Result<()> {
        self.wake_up().await?;
        trace!(command = command.trim_end(), "sending command");
        self.write(command.as_bytes()).await?;
        self.expect_ack(command.trim_end()).await
    }

    /// Reads until `count` line terminators have arrived and returns the non-empty lines.
    async fn read_lines(&mut self, count: usize) -> Result<Vec<String>> {
        let mut buf = Vec::new();
        let mut seen = 0;
        while seen < count {
            buf.push(self.read_byte().await?);
            if buf.ends_with(LINE_END) {
                seen += 1;
            }
            if buf.len() > MAX_REPLY_LEN {
                return Err(Error::Protocol("console reply too long".into()));
            }
        }
        Ok(String::from_utf8_lossy(&buf)
            .split("\n\r")
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Commands answering `\n\rOK\n\r<value>\n\r`.
    async fn ok_command(&mut self, command: &str) -> Result<String> {
        self.wake_up().await?;
        self.write(command.as_bytes()).await?;
        let lines = self.read_lines(3).await?;
        match lines.as_slice() {
            [ok, value] if ok == "OK" => Ok(value.clone()),
            _ => Err(Error::Protocol(format!(
                "unexpected reply to {}: {lines:?}",
                command.trim_end()
            ))),
        }
    }

    pub async fn test(&mut self) -> Result<()> {
        self.wake_up().await?;
        self.write(b"TEST\n").await?;
        let lines = self.read_lines(2).await?;
        if lines.first().map(String::as_str) == Some("TEST") {
            Ok(())
        } else {
            Err(Error::Protocol(format!("unexpected TEST reply: {lines:?}")))
        }
    }

    pub async fn firmware_date(&mut self) -> Result<String> {
        self.ok_command("VER\n").await
    }

    pub async fn firmware_version(&mut self) -> Result<String> {
        self.ok_command("NVER\n").await
    }

    pub async fn diagnostics(&mut self) -> Result<Diagnostics> {
        let line = self.ok_command("RXCHECK\n").await?;
        let values = line
            .split_whitespace()
            .map(str::parse::<u32>)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Parse(format!("RXCHECK reply {line:?}: {e}")))?;
        match values.as_slice() {
            [total_received, total_missed, resyncs, max_in_row, crc_errors] => Ok(Diagnostics {
                total_received: *total_received,
                total_missed: *total_missed,
                resyncs: *resyncs,
                max_in_row: *max_in_row,
                crc_errors: *crc_errors,
            }),
            _ => Err(Error::Parse(format!("RXCHECK reply {line:?}"))),
        }
    }

    /// One LOOP packet.
    pub async fn current_data(&mut self) -> Result<(LoopPacket, RawRecord)> {
        self.ack_command("LOOP 1\n").await?;
        let data = self.read_exact(LOOP_PACKET_LEN).await?;
        parse_loop(&data)
    }

    pub async fn hilows(&mut self) -> Result<(HiLows, RawRecord)> {
        self.ack_command("HILOWS\n").await?;
        let data = self.read_exact(HILOWS_LEN + 2).await?;
        parse_hilows(&data)
    }

    /// Archive records stored after `since`, oldest first.
    pub async fn archives(&mut self, since: NaiveDateTime) -> Result<Vec<ArchiveRecord>> {
        self.ack_command("DMPAFT\n").await?;
        self.write(&archive_stamp(since)).await?;
        self.expect_ack("DMPAFT timestamp").await?;

        let header = self.read_exact(6).await?;
        if !check_crc(&header) {
            return Err(Error::Crc("archive header"));
        }
        let pages = u16::from_le_bytes([header[0], header[1]]);
        let first_index = usize::from(u16::from_le_bytes([header[2], header[3]]));
        debug!(pages, first_index, %since, "downloading archive");

        if pages == 0 {
            self.write(&[ESC]).await?;
            return Ok(Vec::new());
        }
        self.write(&[ACK]).await?;

        let mut records = Vec::new();
        for page_no in 0..pages {
            let page = self.read_exact(ARCHIVE_PAGE_LEN).await?;
            let (_, slots) = parse_archive_page(&page)?;
            for (index, slot) in slots.into_iter().enumerate() {
                if page_no == 0 && index < first_index {
                    continue;
                }
                match parse_archive_record(slot)? {
                    Some(record) if record.timestamp > since => records.push(record),
                    Some(_) => {}
                    None => trace!(page_no, index, "skipping empty archive slot"),
                }
            }
            self.write(&[ACK]).await?;
        }
        Ok(records)
    }

    pub async fn time(&mut self) -> Result<NaiveDateTime> {
        self.ack_command("GETTIME\n").await?;
        let data = self.read_exact(8).await?;
        if !check_crc(&data) {
            return Err(Error::Crc("console time"));
        }
        decode_console_time(&data).ok_or_else(|| Error::Parse(format!("console time {data:02X?}")))
    }

    pub async fn set_time(&mut self, time: NaiveDateTime) -> Result<()> {
        self.ack_command("SETTIME\n").await?;
        self.write(&encode_console_time(time)).await?;
        self.expect_ack("SETTIME payload").await
    }

    pub async fn read_eeprom(&mut self, address: u16, len: u8) -> Result<Vec<u8>> {
        self.ack_command(&eeprom_read_command(address, len)).await?;
        let mut data = self.read_exact(usize::from(len) + 2).await?;
        if !check_crc(&data) {
            return Err(Error::Crc("EEPROM data"));
        }
        data.truncate(usize::from(len));
        Ok(data)
    }

    pub async fn write_eeprom(&mut self, address: u16, data: &[u8]) -> Result<()> {
        let len = u8::try_from(data.len())
            .map_err(|_| Error::InvalidArgument(format!("EEPROM write of {} bytes", data.len())))?;
        self.ack_command(&eeprom_write_command(address, len)).await?;
        self.write(&with_crc(data)).await?;
        self.expect_ack("EEPROM data").await
    }

    pub async fn archive_period(&mut self) -> Result<u16> {
        let data = self.read_eeprom(EEPROM_ARCHIVE_PERIOD, 1).await?;
        Ok(u16::from(data[0]))
    }

    /// Changing the period clears the console's archive memory.
    pub async fn set_archive_period(&mut self, period: ArchivePeriod) -> Result<()> {
        self.ack_command(&format!("SETPER {}\n", period.minutes())).await
    }

    /// Sets the yearly rain counter, in rain collector clicks.
    pub async fn set_yearly_rain(&mut self, clicks: u16) -> Result<()> {
        self.ack_command(&format!("PUTRAIN {clicks}\n")).await
    }

    pub async fn rain_collector(&mut self) -> Result<Option<RainCollector>> {
        let data = self.read_eeprom(EEPROM_SETUP_BITS, 1).await?;
        let collector = RainCollector::from_setup_bits(data[0]);
        if collector.is_none() {
            warn!(setup_bits = data[0], "unknown rain collector setting");
        }
        Ok(collector)
    }

    pub async fn set_rain_collector(&mut self, collector: RainCollector) -> Result<()> {
        let bits = self.read_eeprom(EEPROM_SETUP_BITS, 1).await?[0];
        let updated = collector.apply_to_setup_bits(bits);
        if updated != bits {
            self.write_eeprom(EEPROM_SETUP_BITS, &[updated]).await?;
            self.ack_command("NEWSETUP\n").await?;
        }
        Ok(())
    }

    pub async fn location(&mut self) -> Result<Location> {
        let data = self.read_eeprom(EEPROM_LOCATION, 6).await?;
        let value = |i: usize| i16::from_le_bytes([data[i], data[i + 1]]);
        Ok(Location {
            latitude: f64::from(value(0)) / 10.0,
            longitude: f64::from(value(2)) / 10.0,
            elevation: i32::from(value(4)),
        })
    }
}
