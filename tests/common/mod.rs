//! In-memory Vantage console answering over `tokio::io::duplex`.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Local, NaiveDateTime, Timelike};
use crc::{Crc, CRC_16_XMODEM};
use davis_vantage::{Connector, Error, Result, Transport, VantageClient, VantageClientBuilder};
use davis_vantage::Link;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

pub const ACK: u8 = 0x06;
pub const NAK: u8 = 0x21;
pub const ESC: u8 = 0x1B;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

pub fn with_crc(data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    out.extend_from_slice(&CRC16.checksum(data).to_be_bytes());
    out
}

fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

/// LOOP packet: 85.0 °F outside, 60 %, 5 mph from 200°, raining 0.12"/h.
pub fn loop_packet(temp_out: i16) -> Vec<u8> {
    let mut p = vec![0u8; 97];
    p[0..3].copy_from_slice(b"LOO");
    p[3] = 196;
    put_u16(&mut p, 5, 12);
    put_u16(&mut p, 7, 29875);
    put_u16(&mut p, 9, 713);
    p[11] = 45;
    put_u16(&mut p, 12, temp_out as u16);
    p[14] = 5;
    p[15] = 4;
    put_u16(&mut p, 16, 200);
    p[18..25].fill(255);
    p[25..33].fill(255);
    p[33] = 60;
    p[34..41].fill(255);
    put_u16(&mut p, 41, 12);
    p[43] = 25;
    put_u16(&mut p, 44, 650);
    put_u16(&mut p, 46, 45);
    put_u16(&mut p, 48, (5 << 12) | (17 << 7) | 24);
    put_u16(&mut p, 50, 20);
    put_u16(&mut p, 52, 150);
    put_u16(&mut p, 54, 1200);
    p[62..70].fill(255);
    put_u16(&mut p, 87, 768);
    p[89] = 6;
    p[90] = 44;
    put_u16(&mut p, 91, 612);
    put_u16(&mut p, 93, 2045);
    p[95] = b'\n';
    p[96] = b'\r';
    with_crc(&p)
}

/// HILOWS block with today's outside extremes and a 1.50"/h rain rate high.
pub fn hilows_block() -> Vec<u8> {
    let mut h = vec![0xFFu8; 436];
    put_u16(&mut h, 0, 29500);
    put_u16(&mut h, 2, 30100);
    put_u16(&mut h, 12, 415);
    put_u16(&mut h, 14, 1030);
    h[16] = 23;
    put_u16(&mut h, 17, 1422);
    put_u16(&mut h, 47, 551);
    put_u16(&mut h, 49, 872);
    put_u16(&mut h, 51, 540);
    put_u16(&mut h, 53, 1510);
    put_u16(&mut h, 116, 150);
    put_u16(&mut h, 118, 1705);
    with_crc(&h)
}

pub fn archive_record(at: NaiveDateTime, wind_hi: u8) -> Vec<u8> {
    let mut r = vec![0u8; 52];
    let stamp = at.day() + at.month() * 32 + (at.year() as u32 - 2000) * 512;
    put_u16(&mut r, 0, stamp as u16);
    put_u16(&mut r, 2, (at.hour() * 100 + at.minute()) as u16);
    put_u16(&mut r, 4, 701);
    r[24] = 3;
    r[25] = wind_hi;
    r[26] = 4;
    r[27] = 6;
    r
}

/// DMPAFT page holding up to five records, erased slots after them.
pub fn archive_page(sequence: u8, records: &[Vec<u8>]) -> Vec<u8> {
    let mut page = vec![sequence];
    for slot in 0..5 {
        match records.get(slot) {
            Some(record) => page.extend_from_slice(record),
            None => page.extend_from_slice(&[0xFF; 52]),
        }
    }
    page.extend_from_slice(&[0u8; 4]);
    with_crc(&page)
}

/// Minutes-resolution local time `minutes` ago.
pub fn minutes_ago(minutes: i64) -> NaiveDateTime {
    let t = Local::now().naive_local() - chrono::TimeDelta::minutes(minutes);
    t.with_second(0).and_then(|t| t.with_nanosecond(0)).unwrap()
}

#[derive(Debug)]
pub struct StationState {
    pub loop_packet: Vec<u8>,
    pub hilows: Option<Vec<u8>>,
    pub setup_bits: u8,
    pub archive_period: u8,
    pub location: [u8; 6],
    pub clock: NaiveDateTime,
    pub pages: Vec<Vec<u8>>,
    pub first_index: u16,
    pub yearly_rain: Option<u16>,
    /// EEPROM addresses whose `EEBRD` is answered with NAK.
    pub nak_reads: Vec<u16>,
    pub commands: Vec<String>,
    pub connections: usize,
    pub refuse: bool,
    pub asleep: bool,
}

impl Default for StationState {
    fn default() -> Self {
        let mut location = [0u8; 6];
        location[0..2].copy_from_slice(&523i16.to_le_bytes());
        location[2..4].copy_from_slice(&49i16.to_le_bytes());
        location[4..6].copy_from_slice(&10i16.to_le_bytes());
        Self {
            loop_packet: loop_packet(850),
            hilows: Some(hilows_block()),
            setup_bits: 0x0F,
            archive_period: 5,
            location,
            clock: chrono::NaiveDate::from_ymd_opt(2024, 6, 1)
                .unwrap()
                .and_hms_opt(10, 15, 30)
                .unwrap(),
            pages: vec![archive_page(
                0,
                &[archive_record(minutes_ago(6), 22), archive_record(minutes_ago(1), 13)],
            )],
            first_index: 0,
            yearly_rain: None,
            nak_reads: Vec::new(),
            commands: Vec::new(),
            connections: 0,
            refuse: false,
            asleep: false,
        }
    }
}

pub type SharedState = Arc<Mutex<StationState>>;

#[derive(Clone, Default)]
pub struct FakeConnector {
    pub state: SharedState,
}

impl FakeConnector {
    pub fn new(state: StationState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(&self) -> Result<Box<dyn Transport>> {
        {
            let mut state = self.state.lock().unwrap();
            if state.refuse {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "connection refused",
                )));
            }
            state.connections += 1;
        }
        let (client, server) = tokio::io::duplex(4096);
        tokio::spawn(serve(server, Arc::clone(&self.state)));
        Ok(Box::new(client))
    }

    fn describe(&self) -> String {
        "fake:station".to_string()
    }
}

pub fn client_for(connector: &FakeConnector) -> VantageClient {
    builder_for(connector).build().unwrap()
}

pub fn builder_for(connector: &FakeConnector) -> VantageClientBuilder {
    VantageClientBuilder::new(Link::Tcp {
        host: "127.0.0.1".into(),
        port: 22222,
    })
    .connector(connector.clone())
    .timeout(Duration::from_secs(1))
}

async fn read_line(io: &mut DuplexStream) -> Option<String> {
    let mut line = Vec::new();
    loop {
        let byte = io.read_u8().await.ok()?;
        if byte == b'\n' {
            break;
        }
        line.push(byte);
    }
    Some(String::from_utf8_lossy(&line).trim_end_matches('\r').to_string())
}

async fn read_block(io: &mut DuplexStream, len: usize) -> Option<Vec<u8>> {
    let mut buf = vec![0u8; len];
    io.read_exact(&mut buf).await.ok()?;
    Some(buf)
}

async fn serve(mut io: DuplexStream, state: SharedState) {
    while let Some(line) = read_line(&mut io).await {
        if state.lock().unwrap().asleep {
            continue;
        }
        if line.is_empty() {
            if io.write_all(b"\n\r").await.is_err() {
                return;
            }
            continue;
        }
        state.lock().unwrap().commands.push(line.clone());
        if handle(&mut io, &state, &line).await.is_none() {
            return;
        }
    }
}

async fn handle(io: &mut DuplexStream, state: &SharedState, line: &str) -> Option<()> {
    let mut parts = line.split_whitespace();
    let command = parts.next()?;
    let args: Vec<&str> = parts.collect();

    match command {
        "TEST" => io.write_all(b"\n\rTEST\n\r").await.ok()?,
        "VER" => io.write_all(b"\n\rOK\n\rApr 24 2002\n\r").await.ok()?,
        "NVER" => io.write_all(b"\n\rOK\n\r3.12\n\r").await.ok()?,
        "RXCHECK" => io
            .write_all(b"\n\rOK\n\r 21629 15 0 3204 128\n\r")
            .await
            .ok()?,
        "LOOP" => {
            let packet = state.lock().unwrap().loop_packet.clone();
            io.write_all(&[ACK]).await.ok()?;
            io.write_all(&packet).await.ok()?;
        }
        "HILOWS" => {
            let block = state.lock().unwrap().hilows.clone();
            match block {
                Some(block) => {
                    io.write_all(&[ACK]).await.ok()?;
                    io.write_all(&block).await.ok()?;
                }
                None => io.write_all(&[NAK]).await.ok()?,
            }
        }
        "EEBRD" => {
            let address = u16::from_str_radix(args.first()?, 16).ok()?;
            let len = usize::from_str_radix(args.get(1)?, 16).ok()?;
            let data = {
                let s = state.lock().unwrap();
                if s.nak_reads.contains(&address) {
                    None
                } else {
                    Some(match address {
                        0x0B => s.location[..len].to_vec(),
                        0x2B => vec![s.setup_bits],
                        0x2D => vec![s.archive_period],
                        _ => vec![0; len],
                    })
                }
            };
            match data {
                Some(data) => {
                    io.write_all(&[ACK]).await.ok()?;
                    io.write_all(&with_crc(&data)).await.ok()?;
                }
                None => io.write_all(&[NAK]).await.ok()?,
            }
        }
        "EEBWR" => {
            let address = u16::from_str_radix(args.first()?, 16).ok()?;
            let len = usize::from_str_radix(args.get(1)?, 16).ok()?;
            io.write_all(&[ACK]).await.ok()?;
            let data = read_block(io, len + 2).await?;
            if CRC16.checksum(&data) != 0 {
                io.write_all(&[0x18]).await.ok()?;
                return Some(());
            }
            if address == 0x2B {
                state.lock().unwrap().setup_bits = data[0];
            }
            io.write_all(&[ACK]).await.ok()?;
        }
        "NEWSETUP" => io.write_all(&[ACK]).await.ok()?,
        "GETTIME" => {
            let t = state.lock().unwrap().clock;
            let data = [
                t.second() as u8,
                t.minute() as u8,
                t.hour() as u8,
                t.day() as u8,
                t.month() as u8,
                (t.year() - 1900) as u8,
            ];
            io.write_all(&[ACK]).await.ok()?;
            io.write_all(&with_crc(&data)).await.ok()?;
        }
        "SETTIME" => {
            io.write_all(&[ACK]).await.ok()?;
            let d = read_block(io, 8).await?;
            let date = chrono::NaiveDate::from_ymd_opt(
                1900 + i32::from(d[5]),
                u32::from(d[4]),
                u32::from(d[3]),
            )?;
            let time = chrono::NaiveTime::from_hms_opt(
                u32::from(d[2]),
                u32::from(d[1]),
                u32::from(d[0]),
            )?;
            state.lock().unwrap().clock = NaiveDateTime::new(date, time);
            io.write_all(&[ACK]).await.ok()?;
        }
        "SETPER" => {
            let minutes: u8 = args.first()?.parse().ok()?;
            state.lock().unwrap().archive_period = minutes;
            io.write_all(&[ACK]).await.ok()?;
        }
        "PUTRAIN" => {
            let clicks: u16 = args.first()?.parse().ok()?;
            state.lock().unwrap().yearly_rain = Some(clicks);
            io.write_all(&[ACK]).await.ok()?;
        }
        "DMPAFT" => {
            io.write_all(&[ACK]).await.ok()?;
            let stamp = read_block(io, 6).await?;
            if CRC16.checksum(&stamp) != 0 {
                io.write_all(&[0x18]).await.ok()?;
                return Some(());
            }
            io.write_all(&[ACK]).await.ok()?;

            let (pages, first_index) = {
                let s = state.lock().unwrap();
                (s.pages.clone(), s.first_index)
            };
            let mut header = Vec::new();
            header.extend_from_slice(&(pages.len() as u16).to_le_bytes());
            header.extend_from_slice(&first_index.to_le_bytes());
            io.write_all(&with_crc(&header)).await.ok()?;

            let reply = io.read_u8().await.ok()?;
            state
                .lock()
                .unwrap()
                .commands
                .push(format!("DMPAFT reply {reply:02X}"));
            if reply != ACK {
                return Some(());
            }
            for page in pages {
                io.write_all(&page).await.ok()?;
                if io.read_u8().await.ok()? != ACK {
                    return Some(());
                }
            }
        }
        _ => io.write_all(&[NAK]).await.ok()?,
    }
    Some(())
}
