// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! USP (TR-369) wire model.
//!
//! Hand-maintained `prost` model of the USP 1.0 Record and Message
//! protobuf schemas. The derives define the wire format; field tags
//! follow `usp-record-1-0.proto` and `usp-msg-1-0.proto` exactly, so
//! records interoperate with any TR-369 controller. Encoding/decoding is
//! delegated entirely to `prost`.
//!
//! # Layout
//!
//! ```text
//! Record                      (outer envelope, per-MTP payload)
//!   +-- NoSessionContextRecord
//!         +-- payload: encoded Msg
//! Msg
//!   +-- Header { msg_id, msg_type }
//!   +-- Body   { request | response | error }
//! ```

use crate::error::{Result, UspError};
use prost::Message as _;
use std::collections::HashMap;

// ============================================================================
// Record (usp-record-1-0.proto)
// ============================================================================

/// Outer USP record envelope carried by every MTP.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Record {
    #[prost(string, tag = "1")]
    pub version: String,
    #[prost(string, tag = "2")]
    pub to_id: String,
    #[prost(string, tag = "3")]
    pub from_id: String,
    #[prost(enumeration = "PayloadSecurity", tag = "4")]
    pub payload_security: i32,
    #[prost(bytes = "vec", tag = "5")]
    pub mac_signature: Vec<u8>,
    #[prost(bytes = "vec", tag = "6")]
    pub sender_cert: Vec<u8>,
    #[prost(oneof = "RecordType", tags = "7, 8")]
    pub record_type: Option<RecordType>,
}

#[derive(Clone, PartialEq, ::prost::Oneof)]
pub enum RecordType {
    #[prost(message, tag = "7")]
    NoSessionContext(NoSessionContextRecord),
    #[prost(message, tag = "8")]
    SessionContext(SessionContextRecord),
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NoSessionContextRecord {
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
}

/// End-to-end session context records are accepted on the wire but the
/// agent does not negotiate E2E sessions.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SessionContextRecord {
    #[prost(uint64, tag = "1")]
    pub session_id: u64,
    #[prost(uint64, tag = "2")]
    pub sequence_id: u64,
    #[prost(uint64, tag = "3")]
    pub expected_id: u64,
    #[prost(uint64, tag = "4")]
    pub retransmit_id: u64,
    #[prost(bytes = "vec", repeated, tag = "7")]
    pub payload: Vec<Vec<u8>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum PayloadSecurity {
    Plaintext = 0,
    Tls12 = 1,
}

// ============================================================================
// Message header and body (usp-msg-1-0.proto)
// ============================================================================

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Msg {
    #[prost(message, optional, tag = "1")]
    pub header: Option<Header>,
    #[prost(message, optional, tag = "2")]
    pub body: Option<Body>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Header {
    #[prost(string, tag = "1")]
    pub msg_id: String,
    #[prost(enumeration = "MsgType", tag = "2")]
    pub msg_type: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum MsgType {
    Error = 0,
    Get = 1,
    GetResp = 2,
    Notify = 3,
    Set = 4,
    SetResp = 5,
    Operate = 6,
    OperateResp = 7,
    Add = 8,
    AddResp = 9,
    Delete = 10,
    DeleteResp = 11,
    GetSupportedDm = 12,
    GetSupportedDmResp = 13,
    GetInstances = 14,
    GetInstancesResp = 15,
    NotifyResp = 16,
    GetSupportedProtocol = 17,
    GetSupportedProtocolResp = 18,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Body {
    #[prost(oneof = "MsgBody", tags = "1, 2, 3")]
    pub msg_body: Option<MsgBody>,
}

#[derive(Clone, PartialEq, ::prost::Oneof)]
pub enum MsgBody {
    #[prost(message, tag = "1")]
    Request(Request),
    #[prost(message, tag = "2")]
    Response(Response),
    #[prost(message, tag = "3")]
    Error(ErrorMsg),
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Request {
    #[prost(oneof = "ReqType", tags = "1, 2, 3, 4, 5, 6, 7, 8, 9")]
    pub req_type: Option<ReqType>,
}

#[derive(Clone, PartialEq, ::prost::Oneof)]
pub enum ReqType {
    #[prost(message, tag = "1")]
    Get(Get),
    #[prost(message, tag = "2")]
    GetSupportedDm(GetSupportedDm),
    #[prost(message, tag = "3")]
    GetInstances(GetInstances),
    #[prost(message, tag = "4")]
    Set(Set),
    #[prost(message, tag = "5")]
    Add(Add),
    #[prost(message, tag = "6")]
    Delete(Delete),
    #[prost(message, tag = "7")]
    Operate(Operate),
    #[prost(message, tag = "8")]
    Notify(Notify),
    #[prost(message, tag = "9")]
    GetSupportedProtocol(GetSupportedProtocol),
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Response {
    #[prost(oneof = "RespType", tags = "1, 2, 3, 4, 5, 6, 7, 8, 9")]
    pub resp_type: Option<RespType>,
}

#[derive(Clone, PartialEq, ::prost::Oneof)]
pub enum RespType {
    #[prost(message, tag = "1")]
    GetResp(GetResp),
    #[prost(message, tag = "2")]
    GetSupportedDmResp(GetSupportedDmResp),
    #[prost(message, tag = "3")]
    GetInstancesResp(GetInstancesResp),
    #[prost(message, tag = "4")]
    SetResp(SetResp),
    #[prost(message, tag = "5")]
    AddResp(AddResp),
    #[prost(message, tag = "6")]
    DeleteResp(DeleteResp),
    #[prost(message, tag = "7")]
    OperateResp(OperateResp),
    #[prost(message, tag = "8")]
    NotifyResp(NotifyResp),
    #[prost(message, tag = "9")]
    GetSupportedProtocolResp(GetSupportedProtocolResp),
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ErrorMsg {
    #[prost(fixed32, tag = "1")]
    pub err_code: u32,
    #[prost(string, tag = "2")]
    pub err_msg: String,
    #[prost(message, repeated, tag = "3")]
    pub param_errs: Vec<ParamError>,
}

/// Per-parameter error used by Error, Add and Set responses.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ParamError {
    #[prost(string, tag = "1")]
    pub param_path: String,
    #[prost(fixed32, tag = "2")]
    pub err_code: u32,
    #[prost(string, tag = "3")]
    pub err_msg: String,
}

// ============================================================================
// Get
// ============================================================================

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Get {
    #[prost(string, repeated, tag = "1")]
    pub param_paths: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetResp {
    #[prost(message, repeated, tag = "1")]
    pub req_path_results: Vec<RequestedPathResult>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RequestedPathResult {
    #[prost(string, tag = "1")]
    pub requested_path: String,
    #[prost(fixed32, tag = "2")]
    pub err_code: u32,
    #[prost(string, tag = "3")]
    pub err_msg: String,
    #[prost(message, repeated, tag = "4")]
    pub resolved_path_results: Vec<ResolvedPathResult>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResolvedPathResult {
    #[prost(string, tag = "1")]
    pub resolved_path: String,
    #[prost(map = "string, string", tag = "2")]
    pub result_params: HashMap<String, String>,
}

// ============================================================================
// GetSupportedDM
// ============================================================================

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetSupportedDm {
    #[prost(string, repeated, tag = "1")]
    pub obj_paths: Vec<String>,
    #[prost(bool, tag = "2")]
    pub first_level_only: bool,
    #[prost(bool, tag = "3")]
    pub return_commands: bool,
    #[prost(bool, tag = "4")]
    pub return_events: bool,
    #[prost(bool, tag = "5")]
    pub return_params: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetSupportedDmResp {
    #[prost(message, repeated, tag = "1")]
    pub req_obj_results: Vec<RequestedObjectResult>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RequestedObjectResult {
    #[prost(string, tag = "1")]
    pub req_obj_path: String,
    #[prost(fixed32, tag = "2")]
    pub err_code: u32,
    #[prost(string, tag = "3")]
    pub err_msg: String,
    #[prost(string, tag = "4")]
    pub data_model_inst_uri: String,
    #[prost(message, repeated, tag = "5")]
    pub supported_objs: Vec<SupportedObjectResult>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SupportedObjectResult {
    #[prost(string, tag = "1")]
    pub supported_obj_path: String,
    #[prost(enumeration = "ObjAccessType", tag = "2")]
    pub access: i32,
    #[prost(bool, tag = "3")]
    pub is_multi_instance: bool,
    #[prost(message, repeated, tag = "4")]
    pub supported_commands: Vec<SupportedCommandResult>,
    #[prost(message, repeated, tag = "5")]
    pub supported_events: Vec<SupportedEventResult>,
    #[prost(message, repeated, tag = "6")]
    pub supported_params: Vec<SupportedParamResult>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SupportedParamResult {
    #[prost(string, tag = "1")]
    pub param_name: String,
    #[prost(enumeration = "ParamAccessType", tag = "2")]
    pub access: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SupportedCommandResult {
    #[prost(string, tag = "1")]
    pub command_name: String,
    #[prost(string, repeated, tag = "2")]
    pub input_arg_names: Vec<String>,
    #[prost(string, repeated, tag = "3")]
    pub output_arg_names: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SupportedEventResult {
    #[prost(string, tag = "1")]
    pub event_name: String,
    #[prost(string, repeated, tag = "2")]
    pub arg_names: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ParamAccessType {
    ParamReadOnly = 0,
    ParamReadWrite = 1,
    ParamWriteOnly = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ObjAccessType {
    ObjReadOnly = 0,
    ObjAddDelete = 1,
    ObjAddOnly = 2,
    ObjDeleteOnly = 3,
}

// ============================================================================
// GetInstances
// ============================================================================

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetInstances {
    #[prost(string, repeated, tag = "1")]
    pub obj_paths: Vec<String>,
    #[prost(bool, tag = "2")]
    pub first_level_only: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetInstancesResp {
    #[prost(message, repeated, tag = "1")]
    pub req_path_results: Vec<RequestedInstanceResult>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RequestedInstanceResult {
    #[prost(string, tag = "1")]
    pub requested_path: String,
    #[prost(fixed32, tag = "2")]
    pub err_code: u32,
    #[prost(string, tag = "3")]
    pub err_msg: String,
    #[prost(message, repeated, tag = "4")]
    pub curr_insts: Vec<CurrInstance>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CurrInstance {
    #[prost(string, tag = "1")]
    pub instantiated_obj_path: String,
    #[prost(map = "string, string", tag = "2")]
    pub unique_keys: HashMap<String, String>,
}

// ============================================================================
// GetSupportedProtocol
// ============================================================================

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetSupportedProtocol {
    #[prost(string, tag = "1")]
    pub controller_supported_protocol_versions: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetSupportedProtocolResp {
    #[prost(string, tag = "1")]
    pub agent_supported_protocol_versions: String,
}

// ============================================================================
// Add
// ============================================================================

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Add {
    #[prost(bool, tag = "1")]
    pub allow_partial: bool,
    #[prost(message, repeated, tag = "2")]
    pub create_objs: Vec<CreateObject>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateObject {
    #[prost(string, tag = "1")]
    pub obj_path: String,
    #[prost(message, repeated, tag = "2")]
    pub param_settings: Vec<CreateParamSetting>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateParamSetting {
    #[prost(string, tag = "1")]
    pub param: String,
    #[prost(string, tag = "2")]
    pub value: String,
    #[prost(bool, tag = "3")]
    pub required: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AddResp {
    #[prost(message, repeated, tag = "1")]
    pub created_obj_results: Vec<CreatedObjectResult>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreatedObjectResult {
    #[prost(string, tag = "1")]
    pub requested_path: String,
    #[prost(message, optional, tag = "2")]
    pub oper_status: Option<CreateOperationStatus>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateOperationStatus {
    #[prost(oneof = "CreateOperStatus", tags = "1, 2")]
    pub oper_status: Option<CreateOperStatus>,
}

#[derive(Clone, PartialEq, ::prost::Oneof)]
pub enum CreateOperStatus {
    #[prost(message, tag = "1")]
    OperFailure(OperationFailure),
    #[prost(message, tag = "2")]
    OperSuccess(CreateSuccess),
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OperationFailure {
    #[prost(fixed32, tag = "1")]
    pub err_code: u32,
    #[prost(string, tag = "2")]
    pub err_msg: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateSuccess {
    #[prost(string, tag = "1")]
    pub instantiated_path: String,
    #[prost(message, repeated, tag = "2")]
    pub param_errs: Vec<ParamError>,
    #[prost(map = "string, string", tag = "3")]
    pub unique_keys: HashMap<String, String>,
}

// ============================================================================
// Delete
// ============================================================================

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Delete {
    #[prost(bool, tag = "1")]
    pub allow_partial: bool,
    #[prost(string, repeated, tag = "2")]
    pub obj_paths: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteResp {
    #[prost(message, repeated, tag = "1")]
    pub deleted_obj_results: Vec<DeletedObjectResult>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeletedObjectResult {
    #[prost(string, tag = "1")]
    pub requested_path: String,
    #[prost(message, optional, tag = "2")]
    pub oper_status: Option<DeleteOperationStatus>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteOperationStatus {
    #[prost(oneof = "DeleteOperStatus", tags = "1, 2")]
    pub oper_status: Option<DeleteOperStatus>,
}

#[derive(Clone, PartialEq, ::prost::Oneof)]
pub enum DeleteOperStatus {
    #[prost(message, tag = "1")]
    OperFailure(OperationFailure),
    #[prost(message, tag = "2")]
    OperSuccess(DeleteSuccess),
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteSuccess {
    #[prost(string, repeated, tag = "1")]
    pub affected_paths: Vec<String>,
    #[prost(message, repeated, tag = "2")]
    pub unaffected_path_errs: Vec<UnaffectedPathError>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UnaffectedPathError {
    #[prost(string, tag = "1")]
    pub unaffected_path: String,
    #[prost(fixed32, tag = "2")]
    pub err_code: u32,
    #[prost(string, tag = "3")]
    pub err_msg: String,
}

// ============================================================================
// Set
// ============================================================================

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Set {
    #[prost(bool, tag = "1")]
    pub allow_partial: bool,
    #[prost(message, repeated, tag = "2")]
    pub update_objs: Vec<UpdateObject>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateObject {
    #[prost(string, tag = "1")]
    pub obj_path: String,
    #[prost(message, repeated, tag = "2")]
    pub param_settings: Vec<UpdateParamSetting>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateParamSetting {
    #[prost(string, tag = "1")]
    pub param: String,
    #[prost(string, tag = "2")]
    pub value: String,
    #[prost(bool, tag = "3")]
    pub required: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetResp {
    #[prost(message, repeated, tag = "1")]
    pub updated_obj_results: Vec<UpdatedObjectResult>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdatedObjectResult {
    #[prost(string, tag = "1")]
    pub requested_path: String,
    #[prost(message, optional, tag = "2")]
    pub oper_status: Option<UpdateOperationStatus>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateOperationStatus {
    #[prost(oneof = "UpdateOperStatus", tags = "1, 2")]
    pub oper_status: Option<UpdateOperStatus>,
}

#[derive(Clone, PartialEq, ::prost::Oneof)]
pub enum UpdateOperStatus {
    #[prost(message, tag = "1")]
    OperFailure(UpdateFailure),
    #[prost(message, tag = "2")]
    OperSuccess(UpdateSuccess),
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateFailure {
    #[prost(fixed32, tag = "1")]
    pub err_code: u32,
    #[prost(string, tag = "2")]
    pub err_msg: String,
    #[prost(message, repeated, tag = "3")]
    pub updated_inst_failures: Vec<UpdatedInstanceFailure>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdatedInstanceFailure {
    #[prost(string, tag = "1")]
    pub affected_path: String,
    #[prost(message, repeated, tag = "2")]
    pub param_errs: Vec<ParamError>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateSuccess {
    #[prost(message, repeated, tag = "1")]
    pub updated_inst_results: Vec<UpdatedInstanceResult>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdatedInstanceResult {
    #[prost(string, tag = "1")]
    pub affected_path: String,
    #[prost(message, repeated, tag = "2")]
    pub param_errs: Vec<ParamError>,
    #[prost(map = "string, string", tag = "3")]
    pub updated_params: HashMap<String, String>,
}

// ============================================================================
// Operate
// ============================================================================

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Operate {
    #[prost(string, tag = "1")]
    pub command: String,
    #[prost(string, tag = "2")]
    pub command_key: String,
    #[prost(bool, tag = "3")]
    pub send_resp: bool,
    #[prost(map = "string, string", tag = "4")]
    pub input_args: HashMap<String, String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OperateResp {
    #[prost(message, repeated, tag = "1")]
    pub operation_results: Vec<OperationResult>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OperationResult {
    #[prost(string, tag = "1")]
    pub executed_command: String,
    #[prost(oneof = "OperationResp", tags = "2, 3, 4")]
    pub operation_resp: Option<OperationResp>,
}

#[derive(Clone, PartialEq, ::prost::Oneof)]
pub enum OperationResp {
    /// Asynchronous command: path of the created Request object.
    #[prost(string, tag = "2")]
    ReqObjPath(String),
    /// Synchronous command: immediate output arguments.
    #[prost(message, tag = "3")]
    ReqOutputArgs(OutputArgs),
    #[prost(message, tag = "4")]
    CmdFailure(CommandFailure),
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OutputArgs {
    #[prost(map = "string, string", tag = "1")]
    pub output_args: HashMap<String, String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommandFailure {
    #[prost(fixed32, tag = "1")]
    pub err_code: u32,
    #[prost(string, tag = "2")]
    pub err_msg: String,
}

// ============================================================================
// Notify
// ============================================================================

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Notify {
    #[prost(string, tag = "1")]
    pub subscription_id: String,
    #[prost(bool, tag = "2")]
    pub send_resp: bool,
    #[prost(oneof = "Notification", tags = "3, 4, 5, 6, 7, 8")]
    pub notification: Option<Notification>,
}

#[derive(Clone, PartialEq, ::prost::Oneof)]
pub enum Notification {
    #[prost(message, tag = "3")]
    Event(EventNotify),
    #[prost(message, tag = "4")]
    ValueChange(ValueChangeNotify),
    #[prost(message, tag = "5")]
    ObjCreation(ObjectCreationNotify),
    #[prost(message, tag = "6")]
    ObjDeletion(ObjectDeletionNotify),
    #[prost(message, tag = "7")]
    OperComplete(OperationCompleteNotify),
    #[prost(message, tag = "8")]
    OnBoardReq(OnBoardRequest),
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EventNotify {
    #[prost(string, tag = "1")]
    pub obj_path: String,
    #[prost(string, tag = "2")]
    pub event_name: String,
    #[prost(map = "string, string", tag = "3")]
    pub params: HashMap<String, String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ValueChangeNotify {
    #[prost(string, tag = "1")]
    pub param_path: String,
    #[prost(string, tag = "2")]
    pub param_value: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ObjectCreationNotify {
    #[prost(string, tag = "1")]
    pub obj_path: String,
    #[prost(map = "string, string", tag = "2")]
    pub unique_keys: HashMap<String, String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ObjectDeletionNotify {
    #[prost(string, tag = "1")]
    pub obj_path: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OperationCompleteNotify {
    #[prost(string, tag = "1")]
    pub obj_path: String,
    #[prost(string, tag = "2")]
    pub command_name: String,
    #[prost(string, tag = "3")]
    pub command_key: String,
    #[prost(oneof = "OperationCompleteResp", tags = "4, 5")]
    pub operation_resp: Option<OperationCompleteResp>,
}

#[derive(Clone, PartialEq, ::prost::Oneof)]
pub enum OperationCompleteResp {
    #[prost(message, tag = "4")]
    ReqOutputArgs(OutputArgs),
    #[prost(message, tag = "5")]
    CmdFailure(CommandFailure),
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OnBoardRequest {
    #[prost(string, tag = "1")]
    pub oui: String,
    #[prost(string, tag = "2")]
    pub product_class: String,
    #[prost(string, tag = "3")]
    pub serial_number: String,
    #[prost(string, tag = "4")]
    pub agent_supported_protocol_versions: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NotifyResp {
    #[prost(string, tag = "1")]
    pub subscription_id: String,
}

// ============================================================================
// Helpers
// ============================================================================

impl Record {
    /// Wrap an encoded [`Msg`] in a plaintext no-session-context record.
    pub fn wrap(from_id: &str, to_id: &str, msg: &Msg) -> Self {
        Self {
            version: crate::config::USP_PROTOCOL_VERSION.to_string(),
            to_id: to_id.to_string(),
            from_id: from_id.to_string(),
            payload_security: PayloadSecurity::Plaintext as i32,
            mac_signature: Vec::new(),
            sender_cert: Vec::new(),
            record_type: Some(RecordType::NoSessionContext(NoSessionContextRecord {
                payload: msg.encode_to_vec(),
            })),
        }
    }

    /// Extract and decode the inner message, if any.
    pub fn unwrap_msg(&self) -> Result<Msg> {
        let payload = match &self.record_type {
            Some(RecordType::NoSessionContext(r)) => &r.payload,
            Some(RecordType::SessionContext(_)) => {
                return Err(UspError::RequestDenied(
                    "end-to-end session contexts are not supported".into(),
                ))
            }
            None => {
                return Err(UspError::RequestDenied("record carries no payload".into()));
            }
        };
        Msg::decode(payload.as_slice())
            .map_err(|e| UspError::RequestDenied(format!("failed to parse USP message: {e}")))
    }
}

/// Decode an inbound record, enforcing the maximum message length before
/// any parsing happens.
pub fn decode_record(bytes: &[u8]) -> Result<Record> {
    if bytes.len() > crate::config::MAX_USP_MSG_LEN {
        return Err(UspError::ResourcesExceeded(format!(
            "record of {} bytes exceeds limit of {}",
            bytes.len(),
            crate::config::MAX_USP_MSG_LEN
        )));
    }
    Record::decode(bytes).map_err(|e| UspError::RequestDenied(format!("failed to parse record: {e}")))
}

/// Encode a record for transmission.
pub fn encode_record(record: &Record) -> Vec<u8> {
    record.encode_to_vec()
}

impl Msg {
    /// Build a message with the given header fields and body.
    pub fn new(msg_id: &str, msg_type: MsgType, body: MsgBody) -> Self {
        Self {
            header: Some(Header {
                msg_id: msg_id.to_string(),
                msg_type: msg_type as i32,
            }),
            body: Some(Body {
                msg_body: Some(body),
            }),
        }
    }

    /// Build an Error message answering `msg_id`.
    pub fn error(msg_id: &str, err: &UspError) -> Self {
        Self::new(
            msg_id,
            MsgType::Error,
            MsgBody::Error(ErrorMsg {
                err_code: err.code(),
                err_msg: err.to_string(),
                param_errs: Vec::new(),
            }),
        )
    }

    /// The request message id, or empty if the header is missing.
    pub fn msg_id(&self) -> &str {
        self.header.as_ref().map_or("", |h| h.msg_id.as_str())
    }

    /// The decoded message type, if the header carries a known one.
    pub fn msg_type(&self) -> Option<MsgType> {
        self.header.as_ref().and_then(|h| MsgType::try_from(h.msg_type).ok())
    }
}
