//! Thin stateful wrappers over the two Modbus transport flavours this rig
//! uses (spec.md §2 item 2). The turbovac's raw-serial telegram protocol
//! and the pub/sub `vac` bus do not fit this shape — see `turbo_worker` and
//! `vac_worker`, which own their transports directly.

use async_trait::async_trait;
use tokio_modbus::client::{rtu, Context};
use tokio_modbus::prelude::*;
use tokio_serial::SerialStream;

#[async_trait]
pub trait BusClient: Send {
    async fn read_holding(&mut self, unit: u8, start: u16, count: u16) -> anyhow::Result<Vec<u16>>;
    async fn write_holding(&mut self, unit: u8, start: u16, values: &[u16]) -> anyhow::Result<()>;
}

fn flatten_modbus<T>(result: Result<Result<T, tokio_modbus::ExceptionCode>, std::io::Error>) -> anyhow::Result<T> {
    result?.map_err(|code| anyhow::anyhow!("modbus exception: {code:?}"))
}

/// Modbus-RTU over a local serial line (the `box` worker).
pub struct RtuSerialClient {
    ctx: Context,
}

impl RtuSerialClient {
    pub async fn connect(port: &str, baud_rate: u32) -> anyhow::Result<Self> {
        let builder = tokio_serial::new(port, baud_rate);
        let stream = SerialStream::open(&builder)?;
        let ctx = rtu::attach(stream);
        Ok(Self { ctx })
    }
}

#[async_trait]
impl BusClient for RtuSerialClient {
    async fn read_holding(&mut self, unit: u8, start: u16, count: u16) -> anyhow::Result<Vec<u16>> {
        self.ctx.set_slave(Slave(unit));
        flatten_modbus(self.ctx.read_holding_registers(start, count).await)
    }

    async fn write_holding(&mut self, unit: u8, start: u16, values: &[u16]) -> anyhow::Result<()> {
        self.ctx.set_slave(Slave(unit));
        flatten_modbus(self.ctx.write_multiple_registers(start, values).await)
    }
}

/// Modbus-RTU framing tunneled over TCP (the `therm` worker).
pub struct RtuTcpClient {
    ctx: Context,
}

impl RtuTcpClient {
    pub async fn connect(ip: &str, port: u16) -> anyhow::Result<Self> {
        let addr = format!("{ip}:{port}").parse()?;
        let stream = tokio::net::TcpStream::connect(addr).await?;
        let ctx = rtu::attach_slave(stream, Slave(1));
        Ok(Self { ctx })
    }
}

#[async_trait]
impl BusClient for RtuTcpClient {
    async fn read_holding(&mut self, unit: u8, start: u16, count: u16) -> anyhow::Result<Vec<u16>> {
        self.ctx.set_slave(Slave(unit));
        flatten_modbus(self.ctx.read_holding_registers(start, count).await)
    }

    async fn write_holding(&mut self, unit: u8, start: u16, values: &[u16]) -> anyhow::Result<()> {
        self.ctx.set_slave(Slave(unit));
        flatten_modbus(self.ctx.write_multiple_registers(start, values).await)
    }
}
