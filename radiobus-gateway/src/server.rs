//! Modbus TCP server over the register store.
//!
//! Supported function codes:
//!
//! | code | request                        | bank    |
//! |------|--------------------------------|---------|
//! | 0x03 | Read Holding Registers         | holding |
//! | 0x04 | Read Input Registers           | input   |
//! | 0x06 | Write Single Register          | holding |
//! | 0x10 | Write Multiple Registers       | holding |
//! | 0x2B | Read Device Identification (MEI 0x0E) | - |
//!
//! Everything else answers `IllegalFunction`.

use std::future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_modbus::prelude::*;
use tokio_modbus::server::tcp::{Server, accept_tcp_connection};

use crate::registers::{Bank, RegisterStore};

/// Encapsulated interface transport function code.
pub const FC_ENCAPSULATED_INTERFACE: u8 = 0x2B;
/// MEI type for Read Device Identification.
pub const MEI_READ_DEVICE_ID: u8 = 0x0E;

/// Most registers one read may return.
pub const MAX_READ_QUANTITY: u16 = 125;
/// Most registers one write may carry.
pub const MAX_WRITE_QUANTITY: u16 = 123;

/// Regular identification, stream and individual access.
const CONFORMITY_LEVEL: u8 = 0x82;

/// Identification strings served through MEI 0x0E.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceIdentification {
    pub vendor_name: String,
    pub product_code: String,
    pub revision: String,
    pub vendor_url: String,
    pub product_name: String,
    pub model_name: String,
}

impl Default for DeviceIdentification {
    fn default() -> Self {
        Self {
            vendor_name: "Radiobus".to_string(),
            product_code: "RB-GW".to_string(),
            revision: env!("CARGO_PKG_VERSION").to_string(),
            vendor_url: String::new(),
            product_name: "Radiobus Gateway".to_string(),
            model_name: "radiobus-gateway".to_string(),
        }
    }
}

impl DeviceIdentification {
    /// Object value by id, for ids 0x00..=0x05.
    pub fn object(&self, id: u8) -> Option<&str> {
        match id {
            0x00 => Some(&self.vendor_name),
            0x01 => Some(&self.product_code),
            0x02 => Some(&self.revision),
            0x03 => Some(&self.vendor_url),
            0x04 => Some(&self.product_name),
            0x05 => Some(&self.model_name),
            _ => None,
        }
    }

    /// Build the MEI 0x0E response body for `[mei, read_code, object_id]`.
    pub fn respond(&self, request: &[u8]) -> Result<Bytes, ExceptionCode> {
        let [mei, read_code, object_id] = request else {
            return Err(ExceptionCode::IllegalDataValue);
        };
        if *mei != MEI_READ_DEVICE_ID {
            return Err(ExceptionCode::IllegalFunction);
        }

        let ids: Vec<u8> = match read_code {
            // Basic stream.
            0x01 => (0x00..=0x02).collect(),
            // Regular and extended stream; no extended objects are defined.
            0x02 | 0x03 => (0x00..=0x05).collect(),
            // Individual access.
            0x04 => {
                if self.object(*object_id).is_none() {
                    return Err(ExceptionCode::IllegalDataAddress);
                }
                vec![*object_id]
            }
            _ => return Err(ExceptionCode::IllegalDataValue),
        };

        // Stream access restarts at object 0 when asked for an unknown id.
        let ids: Vec<u8> = if *read_code != 0x04 && ids.contains(object_id) {
            ids.into_iter().filter(|id| id >= object_id).collect()
        } else {
            ids
        };

        let mut body = BytesMut::new();
        body.put_u8(MEI_READ_DEVICE_ID);
        body.put_u8(*read_code);
        body.put_u8(CONFORMITY_LEVEL);
        body.put_u8(0x00); // more follows
        body.put_u8(0x00); // next object id
        body.put_u8(ids.len() as u8);

        for id in ids {
            let value = self.object(id).unwrap_or_default().as_bytes();
            let len = value.len().min(usize::from(u8::MAX));
            body.put_u8(id);
            body.put_u8(len as u8);
            body.put_slice(&value[..len]);
        }

        Ok(body.freeze())
    }
}

/// Request handler shared by every connection.
#[derive(Debug, Clone)]
pub struct GatewayService {
    registers: Arc<RegisterStore>,
    identification: Arc<DeviceIdentification>,
}

impl GatewayService {
    pub fn new(registers: Arc<RegisterStore>, identification: DeviceIdentification) -> Self {
        Self {
            registers,
            identification: Arc::new(identification),
        }
    }

    fn read(&self, bank: Bank, address: u16, count: u16) -> Result<Vec<u16>, ExceptionCode> {
        if count == 0 || count > MAX_READ_QUANTITY {
            return Err(ExceptionCode::IllegalDataValue);
        }
        self.registers.read(bank, address, count).map_err(|e| {
            tracing::debug!(error = %e, "Read outside register space");
            ExceptionCode::IllegalDataAddress
        })
    }

    fn write(&self, address: u16, words: &[u16]) -> Result<(), ExceptionCode> {
        if words.is_empty() || words.len() > usize::from(MAX_WRITE_QUANTITY) {
            return Err(ExceptionCode::IllegalDataValue);
        }
        self.registers.write_holding(address, words).map_err(|e| {
            tracing::debug!(error = %e, "Write outside register space");
            ExceptionCode::IllegalDataAddress
        })
    }

    fn handle(&self, req: Request<'static>) -> Result<Response, ExceptionCode> {
        match req {
            Request::ReadHoldingRegisters(addr, cnt) => self
                .read(Bank::Holding, addr, cnt)
                .map(Response::ReadHoldingRegisters),
            Request::ReadInputRegisters(addr, cnt) => self
                .read(Bank::Input, addr, cnt)
                .map(Response::ReadInputRegisters),
            Request::WriteSingleRegister(addr, value) => self
                .write(addr, std::slice::from_ref(&value))
                .map(|_| Response::WriteSingleRegister(addr, value)),
            Request::WriteMultipleRegisters(addr, values) => self
                .write(addr, &values)
                .map(|_| Response::WriteMultipleRegisters(addr, values.len() as u16)),
            Request::Custom(FC_ENCAPSULATED_INTERFACE, data) => self
                .identification
                .respond(&data)
                .map(|body| Response::Custom(FC_ENCAPSULATED_INTERFACE, body)),
            other => {
                tracing::debug!(request = ?other, "Unsupported function");
                Err(ExceptionCode::IllegalFunction)
            }
        }
    }
}

impl tokio_modbus::server::Service for GatewayService {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        future::ready(self.handle(req))
    }
}

/// Serve Modbus TCP on `listener` until the task is cancelled.
pub async fn serve(listener: TcpListener, service: GatewayService) -> io::Result<()> {
    let local = listener.local_addr()?;
    let server = Server::new(listener);

    let on_connected = move |stream, socket_addr: SocketAddr| {
        let service = service.clone();
        async move {
            tracing::debug!(peer = %socket_addr, "Modbus client connected");
            accept_tcp_connection(stream, socket_addr, move |_| Ok(Some(service.clone())))
        }
    };
    let on_process_error = |err| {
        tracing::warn!(error = %err, "Modbus connection error");
    };

    tracing::info!(bind = %local, "Modbus server listening");
    server.serve(&on_connected, on_process_error).await
}
