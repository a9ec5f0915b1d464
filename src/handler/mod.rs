//! The IPP Operation Handler: stateful dispatch by operation id,
//! response construction, and the fault-injection short-circuit
//! (spec.md §4.5).

pub mod http;

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::{FaultInjection, ServiceConfig};
use crate::document;
use crate::store::{JobStore, StoreError};
use crate::wire::{
    Attribute, AttributeGroup, AttributeValue, DelimiterTag, IppPacket, Operation, StatusCode,
    WireError,
};

/// Errors raised while servicing one request. Each maps to exactly one
/// IPP status code (spec.md §7).
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("Print-Job/Send-Document body carried no document")]
    MissingDocument,
    #[error("document format not supported")]
    UnsupportedFormat,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl HandlerError {
    fn status(&self) -> StatusCode {
        match self {
            HandlerError::Wire(_) => StatusCode::ClientErrorBadRequest,
            HandlerError::MissingDocument => StatusCode::ClientErrorBadRequest,
            HandlerError::UnsupportedFormat => StatusCode::ClientErrorDocumentFormatNotSupported,
            HandlerError::Store(_) => StatusCode::ServerErrorInternalError,
        }
    }
}

/// Printer lifecycle state (spec.md §3 `PrinterState`, §4.5 "Service
/// level" state machine — `state` here tracks only idle/processing/
/// stopped; `ServiceState` in [`crate::service`] tracks the listener's
/// start/stop transitions).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrinterOperatingState {
    Idle,
    Processing,
    Stopped,
}

/// Shared, read-mostly printer configuration and runtime flags.
/// Mutation (renaming the printer, toggling fault injection) happens
/// outside request handling (spec.md §5 "Shared resource policy").
pub struct PrinterState {
    pub name: String,
    pub port: u16,
    pub host_ip: Ipv4Addr,
    pub accepting: bool,
    pub operating_state: PrinterOperatingState,
    pub fault_injection: FaultInjection,
    pub custom_printer_attributes: Option<AttributeGroup>,
    start_time: Instant,
}

impl PrinterState {
    pub fn from_config(config: &ServiceConfig) -> PrinterState {
        PrinterState {
            name: config.printer_name.clone(),
            port: config.port,
            host_ip: local_ipv4(),
            accepting: true,
            operating_state: PrinterOperatingState::Idle,
            fault_injection: config.fault_injection,
            custom_printer_attributes: config.custom_printer_attributes.clone(),
            start_time: Instant::now(),
        }
    }

    fn uptime_secs(&self) -> i32 {
        self.start_time.elapsed().as_secs() as i32
    }

    fn host_port(&self) -> String {
        format!("{}:{}", self.host_ip, self.port)
    }
}

/// Best-effort discovery of the host's routable IPv4 address, used to
/// build `printer-uri-supported` and `job-uri` (spec.md §4.5, §6).
/// `0.0.0.0`, the listener's bind address, is never a usable value in
/// those attributes. Falls back to the loopback address if no route to
/// a public address exists (e.g. an isolated test environment).
fn local_ipv4() -> Ipv4Addr {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .ok()
        .and_then(|addr| match addr.ip() {
            std::net::IpAddr::V4(v4) => Some(v4),
            std::net::IpAddr::V6(_) => None,
        })
        .unwrap_or(Ipv4Addr::LOCALHOST)
}

const SUPPORTED_DOCUMENT_FORMATS: &[&str] = &[
    "application/pdf",
    "application/octet-stream",
    "image/jpeg",
    "image/png",
    "text/plain",
];
const SUPPORTED_MEDIA: &[&str] = &["iso_a4_210x297mm", "iso_a5_148x210mm", "na_letter_8.5x11in", "na_legal_8.5x14in"];
const SUPPORTED_OPERATIONS: &[Operation] = &[
    Operation::PrintJob,
    Operation::ValidateJob,
    Operation::CreateJob,
    Operation::SendDocument,
    Operation::CancelJob,
    Operation::GetJobAttributes,
    Operation::GetJobs,
    Operation::GetPrinterAttributes,
    Operation::HoldJob,
    Operation::ReleaseJob,
    Operation::PausePrinter,
    Operation::ResumePrinter,
    Operation::PurgeJobs,
];

fn operation_code(op: Operation) -> i32 {
    let packet = IppPacket::new_request(op, 1);
    packet.operation_or_status as i32
}

/// Always the first group of a response: `attributes-charset` then
/// `attributes-natural-language` (spec.md §8 property 3).
fn operation_prelude() -> AttributeGroup {
    let mut group = AttributeGroup::new(DelimiterTag::Operation);
    group.push(Attribute::new(
        "attributes-charset",
        AttributeValue::Charset("utf-8".into()),
    ));
    group.push(Attribute::new(
        "attributes-natural-language",
        AttributeValue::NaturalLanguage("en".into()),
    ));
    group
}

fn response(status: StatusCode, request_id: u32) -> IppPacket {
    let mut packet = IppPacket::new_response(status, request_id);
    packet.push_group(operation_prelude());
    packet
}

fn job_state_group(job_id: u32, host_port: &str, state: i32, reasons: &str) -> AttributeGroup {
    let mut group = AttributeGroup::new(DelimiterTag::Job);
    group.push(Attribute::new("job-id", AttributeValue::Integer(job_id as i32)));
    group.push(Attribute::new(
        "job-uri",
        AttributeValue::Uri(format!("ipp://{}/jobs/{}", host_port, job_id)),
    ));
    group.push(Attribute::new("job-state", AttributeValue::Enum(state)));
    group.push(Attribute::new(
        "job-state-reasons",
        AttributeValue::Keyword(reasons.to_string()),
    ));
    group
}

fn request_string(packet: &IppPacket, name: &str) -> Option<String> {
    packet.find_operation_attribute(name).map(|attr| match attr.first_value() {
        AttributeValue::Keyword(s)
        | AttributeValue::Uri(s)
        | AttributeValue::NameWithoutLanguage(s)
        | AttributeValue::TextWithoutLanguage(s)
        | AttributeValue::MimeMediaType(s) => s.clone(),
        other => format!("{:?}", other),
    })
}

fn request_integer(packet: &IppPacket, name: &str) -> Option<i32> {
    packet.find_operation_attribute(name).and_then(|attr| match attr.first_value() {
        AttributeValue::Integer(i) | AttributeValue::Enum(i) => Some(*i),
        _ => None,
    })
}

fn request_boolean(packet: &IppPacket, name: &str, default: bool) -> bool {
    packet
        .find_operation_attribute(name)
        .and_then(|attr| match attr.first_value() {
            AttributeValue::Boolean(b) => Some(*b),
            _ => None,
        })
        .unwrap_or(default)
}

/// Stateful IPP operation dispatcher, holding a shared reference to
/// the printer state and the append-mostly job store (spec.md §3
/// "Ownership").
pub struct IppHandler {
    state: Arc<RwLock<PrinterState>>,
    store: Arc<JobStore>,
}

impl IppHandler {
    pub fn new(state: Arc<RwLock<PrinterState>>, store: Arc<JobStore>) -> IppHandler {
        IppHandler { state, store }
    }

    /// Dispatch a decoded request and return the encoded-ready
    /// response. Never panics (spec.md §7); every fallible step is
    /// funneled through [`HandlerError`] and converted to the matching
    /// status code.
    pub async fn handle(&self, packet: IppPacket, body: &[u8], peer: SocketAddr) -> IppPacket {
        let request_id = packet.request_id;
        let op = Operation::from_u16(packet.operation_or_status);
        log::info!("ipp request op={:?} request_id={} peer={}", op, request_id, peer);

        let result = self.dispatch(op, &packet, body).await;
        match result {
            Ok(resp) => resp,
            Err(err) => {
                log::warn!(
                    "ipp request failed op={:?} request_id={} peer={} error={}",
                    op,
                    request_id,
                    peer,
                    err
                );
                response(err.status(), request_id)
            }
        }
    }

    async fn dispatch(
        &self,
        op: Operation,
        packet: &IppPacket,
        body: &[u8],
    ) -> Result<IppPacket, HandlerError> {
        let request_id = packet.request_id;
        let fault = self.state.read().await.fault_injection;

        match (fault, op) {
            (FaultInjection::Aborted, Operation::PrintJob | Operation::CreateJob) => {
                return Ok(self.canceled_response(request_id).await);
            }
            (FaultInjection::UnsupportedFormat, Operation::PrintJob | Operation::ValidateJob) => {
                return Ok(response(StatusCode::ClientErrorDocumentFormatNotSupported, request_id));
            }
            (FaultInjection::ServerError, _) => {
                return Err(HandlerError::Store(StoreError::Io(std::io::Error::other(
                    "fault injection: server-error",
                ))));
            }
            (FaultInjection::ClientError, _) => {
                return Ok(response(StatusCode::ClientErrorBadRequest, request_id));
            }
            _ => {}
        }

        match op {
            Operation::GetPrinterAttributes => Ok(self.get_printer_attributes(request_id).await),
            Operation::ValidateJob => Ok(response(StatusCode::SuccessfulOk, request_id)),
            Operation::PrintJob => self.print_job(packet, body).await,
            Operation::CreateJob => self.create_job(request_id).await,
            Operation::SendDocument => self.send_document(packet, body).await,
            Operation::GetJobAttributes | Operation::GetJobs => {
                Ok(self.echo_job(packet, request_id, "none"))
            }
            Operation::CancelJob => Ok(self.echo_job(packet, request_id, "job-canceled-by-user")),
            Operation::HoldJob => Ok(self.echo_job(packet, request_id, "job-hold-until-specified")),
            Operation::ReleaseJob => Ok(self.echo_job(packet, request_id, "none")),
            Operation::PausePrinter => {
                self.state.write().await.accepting = false;
                Ok(response(StatusCode::SuccessfulOk, request_id))
            }
            Operation::ResumePrinter => {
                self.state.write().await.accepting = true;
                Ok(response(StatusCode::SuccessfulOk, request_id))
            }
            Operation::PurgeJobs => {
                self.store.delete_all().await?;
                Ok(response(StatusCode::SuccessfulOk, request_id))
            }
            _ => Ok(response(StatusCode::SuccessfulOk, request_id)),
        }
    }

    async fn canceled_response(&self, request_id: u32) -> IppPacket {
        let mut resp = response(StatusCode::ClientErrorNotPossible, request_id);
        let mut group = AttributeGroup::new(DelimiterTag::Job);
        group.push(Attribute::new("job-state", AttributeValue::Enum(7)));
        group.push(Attribute::new(
            "job-state-reasons",
            AttributeValue::Keyword("job-canceled-by-system".into()),
        ));
        resp.push_group(group);
        resp
    }

    fn echo_job(&self, packet: &IppPacket, request_id: u32, reasons: &str) -> IppPacket {
        let job_id = request_integer(packet, "job-id").unwrap_or(0);
        let mut resp = response(StatusCode::SuccessfulOk, request_id);
        let mut group = AttributeGroup::new(DelimiterTag::Job);
        group.push(Attribute::new("job-id", AttributeValue::Integer(job_id)));
        group.push(Attribute::new(
            "job-state-reasons",
            AttributeValue::Keyword(reasons.to_string()),
        ));
        resp.push_group(group);
        resp
    }

    async fn get_printer_attributes(&self, request_id: u32) -> IppPacket {
        let state = self.state.read().await;
        let mut resp = response(StatusCode::SuccessfulOk, request_id);

        if let Some(custom) = &state.custom_printer_attributes {
            resp.push_group(custom.clone());
            return resp;
        }

        let host_port = state.host_port();
        let mut group = AttributeGroup::new(DelimiterTag::Printer);
        group.push(Attribute::new(
            "printer-name",
            AttributeValue::NameWithoutLanguage(state.name.clone()),
        ));
        group.push(Attribute::new("printer-state", AttributeValue::Enum(3)));
        group.push(Attribute::new(
            "printer-state-reasons",
            AttributeValue::Keyword(if state.accepting { "none" } else { "paused" }.to_string()),
        ));
        group.push(Attribute::new(
            "printer-is-accepting-jobs",
            AttributeValue::Boolean(state.accepting),
        ));
        group.push(Attribute::new(
            "printer-uri-supported",
            AttributeValue::Uri(format!("ipp://{}/", host_port)),
        ));
        group.push(Attribute::new(
            "printer-location",
            AttributeValue::TextWithoutLanguage("".to_string()),
        ));
        group.push(Attribute::new(
            "printer-info",
            AttributeValue::TextWithoutLanguage(state.name.clone()),
        ));
        group.push(Attribute::new(
            "printer-make-and-model",
            AttributeValue::TextWithoutLanguage("Virtual Printer".to_string()),
        ));
        group.push(
            Attribute::new_multi(
                "document-format-supported",
                SUPPORTED_DOCUMENT_FORMATS
                    .iter()
                    .map(|f| AttributeValue::MimeMediaType(f.to_string()))
                    .collect(),
            )
            .expect("static list is non-empty"),
        );
        group.push(Attribute::new(
            "document-format-default",
            AttributeValue::MimeMediaType("application/pdf".to_string()),
        ));
        group.push(Attribute::new(
            "media-default",
            AttributeValue::Keyword(SUPPORTED_MEDIA[0].to_string()),
        ));
        group.push(
            Attribute::new_multi(
                "media-supported",
                SUPPORTED_MEDIA.iter().map(|m| AttributeValue::Keyword(m.to_string())).collect(),
            )
            .expect("static list is non-empty"),
        );
        group.push(
            Attribute::new_multi(
                "operations-supported",
                SUPPORTED_OPERATIONS.iter().map(|op| AttributeValue::Enum(operation_code(*op))).collect(),
            )
            .expect("static list is non-empty"),
        );
        group.push(Attribute::new("color-supported", AttributeValue::Boolean(true)));
        group.push(Attribute::new(
            "printer-up-time",
            AttributeValue::Integer(state.uptime_secs()),
        ));
        resp.push_group(group);
        resp
    }

    async fn print_job(&self, packet: &IppPacket, body: &[u8]) -> Result<IppPacket, HandlerError> {
        let payload = document::extract_document(body);
        if payload.is_empty() {
            return Err(HandlerError::MissingDocument);
        }
        let job_id = self.store.next_job_id();
        let declared = request_string(packet, "document-format").unwrap_or_else(|| "application/octet-stream".to_string());
        self.persist(payload, job_id, &declared).await?;

        let state = self.state.read().await;
        let host_port = state.host_port();
        let request_id = packet.request_id;
        let mut resp = response(StatusCode::SuccessfulOk, request_id);
        resp.push_group(job_state_group(job_id, &host_port, 5, "processing-to-stop-point"));
        Ok(resp)
    }

    async fn create_job(&self, request_id: u32) -> Result<IppPacket, HandlerError> {
        let job_id = self.store.next_job_id();
        let state = self.state.read().await;
        let host_port = state.host_port();
        let mut resp = response(StatusCode::SuccessfulOk, request_id);
        resp.push_group(job_state_group(job_id, &host_port, 3, "none"));
        Ok(resp)
    }

    async fn send_document(&self, packet: &IppPacket, body: &[u8]) -> Result<IppPacket, HandlerError> {
        let job_id = request_integer(packet, "job-id").ok_or(HandlerError::MissingDocument)? as u32;
        let last_document = request_boolean(packet, "last-document", true);
        let payload = document::extract_document(body);
        if payload.is_empty() {
            return Err(HandlerError::MissingDocument);
        }
        let declared = request_string(packet, "document-format").unwrap_or_else(|| "application/octet-stream".to_string());
        self.persist(payload, job_id, &declared).await?;

        let state = self.state.read().await;
        let host_port = state.host_port();
        let request_id = packet.request_id;
        let mut resp = response(StatusCode::SuccessfulOk, request_id);
        let (job_state, reasons) = if last_document {
            (9, "job-completed-successfully")
        } else {
            (4, "job-incoming")
        };
        resp.push_group(job_state_group(job_id, &host_port, job_state, reasons));
        Ok(resp)
    }

    async fn persist(&self, payload: &[u8], job_id: u32, declared: &str) -> Result<(), HandlerError> {
        let detected = document::classify(payload);
        let normalised = document::normalise(detected, declared, payload);
        let (primary_bytes, primary_format) = normalised.primary;
        self.store.save(&primary_bytes, job_id, declared, primary_format).await?;
        if let Some((companion_bytes, companion_format)) = normalised.companion {
            self.store.save_companion(&companion_bytes, job_id, companion_format).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfigBuilder;
    use std::net::{IpAddr, Ipv4Addr};

    fn peer() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9100)
    }

    fn handler_with(fault: FaultInjection) -> (IppHandler, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = ServiceConfigBuilder::default()
            .fault_injection(fault)
            .job_store_dir(dir.path())
            .build()
            .unwrap();
        let store = Arc::new(JobStore::new(&config.job_store_dir).unwrap());
        let state = Arc::new(RwLock::new(PrinterState::from_config(&config)));
        (IppHandler::new(state, store), dir)
    }

    fn print_job_request(request_id: u32, document_format: &str) -> IppPacket {
        let mut packet = IppPacket::new_request(Operation::PrintJob, request_id);
        let mut group = AttributeGroup::new(DelimiterTag::Operation);
        group.push(Attribute::new(
            "document-format",
            AttributeValue::MimeMediaType(document_format.to_string()),
        ));
        packet.push_group(group);
        packet
    }

    fn body_with_pdf() -> Vec<u8> {
        let mut body = vec![0u8; 8];
        body.push(0x03);
        body.extend_from_slice(b"%PDF-1.4\n...%%EOF");
        body
    }

    #[tokio::test]
    async fn get_printer_attributes_reports_current_accepting_state() {
        let (handler, _dir) = handler_with(FaultInjection::Off);
        let packet = IppPacket::new_request(Operation::GetPrinterAttributes, 1);
        let resp = handler.handle(packet, &[], peer()).await;
        assert_eq!(resp.operation_or_status, StatusCode::SuccessfulOk.code());
        let printer_group = resp.groups.iter().find(|g| g.tag == DelimiterTag::Printer).unwrap();
        let accepting = printer_group.get("printer-is-accepting-jobs").unwrap();
        assert_eq!(*accepting.first_value(), AttributeValue::Boolean(true));
    }

    #[tokio::test]
    async fn print_job_persists_document_and_reports_processing() {
        let (handler, dir) = handler_with(FaultInjection::Off);
        let packet = print_job_request(2, "application/pdf");
        let resp = handler.handle(packet, &body_with_pdf(), peer()).await;
        assert_eq!(resp.operation_or_status, StatusCode::SuccessfulOk.code());

        let job_group = resp.groups.iter().find(|g| g.tag == DelimiterTag::Job).unwrap();
        assert!(matches!(
            job_group.get("job-state").unwrap().first_value(),
            AttributeValue::Enum(5)
        ));

        let mut entries = std::fs::read_dir(dir.path()).unwrap();
        assert!(entries.next().is_some());
    }

    #[tokio::test]
    async fn print_job_without_a_document_is_rejected() {
        let (handler, _dir) = handler_with(FaultInjection::Off);
        let packet = print_job_request(3, "application/pdf");
        let resp = handler.handle(packet, &[0u8; 8], peer()).await;
        assert_eq!(resp.operation_or_status, StatusCode::ClientErrorBadRequest.code());
    }

    #[tokio::test]
    async fn aborted_fault_injection_cancels_print_job_before_it_is_stored() {
        let (handler, dir) = handler_with(FaultInjection::Aborted);
        let packet = print_job_request(4, "application/pdf");
        let resp = handler.handle(packet, &body_with_pdf(), peer()).await;
        assert_eq!(resp.operation_or_status, StatusCode::ClientErrorNotPossible.code());

        let mut entries = std::fs::read_dir(dir.path()).unwrap();
        assert!(entries.next().is_none(), "no file should have been written");
    }

    #[tokio::test]
    async fn unsupported_format_fault_injection_rejects_validate_job() {
        let (handler, _dir) = handler_with(FaultInjection::UnsupportedFormat);
        let packet = IppPacket::new_request(Operation::ValidateJob, 5);
        let resp = handler.handle(packet, &[], peer()).await;
        assert_eq!(
            resp.operation_or_status,
            StatusCode::ClientErrorDocumentFormatNotSupported.code()
        );
    }

    #[tokio::test]
    async fn pause_then_resume_printer_round_trips_accepting_flag() {
        let (handler, _dir) = handler_with(FaultInjection::Off);
        handler
            .handle(IppPacket::new_request(Operation::PausePrinter, 6), &[], peer())
            .await;
        let paused = handler
            .handle(IppPacket::new_request(Operation::GetPrinterAttributes, 7), &[], peer())
            .await;
        let printer_group = paused.groups.iter().find(|g| g.tag == DelimiterTag::Printer).unwrap();
        assert_eq!(
            *printer_group.get("printer-is-accepting-jobs").unwrap().first_value(),
            AttributeValue::Boolean(false)
        );

        handler
            .handle(IppPacket::new_request(Operation::ResumePrinter, 8), &[], peer())
            .await;
        let resumed = handler
            .handle(IppPacket::new_request(Operation::GetPrinterAttributes, 9), &[], peer())
            .await;
        let printer_group = resumed.groups.iter().find(|g| g.tag == DelimiterTag::Printer).unwrap();
        assert_eq!(
            *printer_group.get("printer-is-accepting-jobs").unwrap().first_value(),
            AttributeValue::Boolean(true)
        );
    }
}
