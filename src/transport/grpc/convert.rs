use crate::grpc::{
    proto_append_result, proto_client_error, proto_peer_error, proto_publish_result, proto_reply, proto_request,
    proto_response, proto_timeout_now_result, proto_vote_result, ProtoAppendReq, ProtoAppendResult,
    ProtoAppendSuccess, ProtoClientError, ProtoCloseSessionReq, ProtoCommandConsistency, ProtoCommandReq, ProtoEmpty,
    ProtoEvent, ProtoJoinReq, ProtoKeepAliveReq, ProtoLeaveReq, ProtoLogEntry, ProtoMissingLog, ProtoOpenSessionReq,
    ProtoOperation, ProtoPeerError, ProtoPublishReq, ProtoPublishResult, ProtoPublishSuccess, ProtoQueryConsistency,
    ProtoQueryReq, ProtoReply, ProtoReplySuccess, ProtoRequest, ProtoResponse, ProtoServerFault, ProtoStaleTerm,
    ProtoTimeoutNowReq, ProtoTimeoutNowResult, ProtoUnsupported, ProtoVoteReq, ProtoVoteResult, ProtoVoteSuccess,
};
use crate::protocol::{
    AppendOk, AppendRequest, CloseSessionOk, CloseSessionRequest, CommandConsistency, CommandOk, CommandRequest,
    JoinOk, JoinRequest, KeepAliveOk, KeepAliveRequest, LeaveOk, LeaveRequest, OpenSessionOk, OpenSessionRequest,
    Operation, PeerError, ProtocolError, PublishOk, PublishRequest, PublishedEvent, QueryConsistency, QueryOk,
    QueryRequest, Reply, Request, Response, SessionId, TimeoutNowOk, TimeoutNowRequest, VoteOk, VoteRequest,
    WireEntry,
};
use crate::transport::{Address, TransportError};
use bytes::Bytes;

fn malformed(what: &str) -> TransportError {
    TransportError::Malformed(format!("Missing or invalid {}", what))
}

fn opt_address(address: String) -> Option<Address> {
    if address.is_empty() {
        None
    } else {
        Some(Address::new(address))
    }
}

fn address_or_empty(address: Option<Address>) -> String {
    address.map(Address::into_inner).unwrap_or_default()
}

// ------- Requests --------

pub(super) fn request_to_proto(request: Request) -> ProtoRequest {
    let body = match request {
        Request::Vote(r) => proto_request::Body::Vote(ProtoVoteReq {
            term: r.term,
            candidate: r.candidate.into_inner(),
            last_log_entry_index: r.last_log_index,
            last_log_entry_term: r.last_log_term,
        }),
        Request::Append(r) => proto_request::Body::Append(ProtoAppendReq {
            term: r.term,
            leader: r.leader.into_inner(),
            previous_log_entry_index: r.previous_log_index,
            previous_log_entry_term: r.previous_log_term,
            previous_is_base: r.previous_is_base,
            new_entries: r
                .entries
                .into_iter()
                .map(|entry| ProtoLogEntry {
                    term: entry.term,
                    data: entry.data.to_vec(),
                })
                .collect(),
            commit_index: r.commit_index,
            global_index: r.global_index,
        }),
        Request::TimeoutNow(r) => proto_request::Body::TimeoutNow(ProtoTimeoutNowReq {
            term: r.term,
            leader: r.leader.into_inner(),
        }),
        Request::Join(r) => proto_request::Body::Join(ProtoJoinReq {
            member: r.member.into_inner(),
        }),
        Request::Leave(r) => proto_request::Body::Leave(ProtoLeaveReq {
            member: r.member.into_inner(),
        }),
        Request::OpenSession(r) => proto_request::Body::OpenSession(ProtoOpenSessionReq {
            client_id: r.client_id,
            client_address: address_or_empty(r.client_address),
        }),
        Request::KeepAlive(r) => proto_request::Body::KeepAlive(ProtoKeepAliveReq {
            session_id: r.session_id.as_u64(),
            command_sequence: r.command_sequence,
            event_index: r.event_index,
        }),
        Request::Command(r) => proto_request::Body::Command(ProtoCommandReq {
            session_id: r.session_id.as_u64(),
            sequence: r.sequence,
            operation: Some(operation_to_proto(r.operation)),
            consistency: command_consistency_to_proto(r.consistency) as i32,
        }),
        Request::Query(r) => proto_request::Body::Query(ProtoQueryReq {
            session_id: r.session_id.as_u64(),
            sequence: r.sequence,
            index: r.index,
            operation: Some(operation_to_proto(r.operation)),
            consistency: query_consistency_to_proto(r.consistency) as i32,
        }),
        Request::CloseSession(r) => proto_request::Body::CloseSession(ProtoCloseSessionReq {
            session_id: r.session_id.as_u64(),
        }),
        Request::Publish(r) => proto_request::Body::Publish(ProtoPublishReq {
            session_id: r.session_id.as_u64(),
            event_index: r.event_index,
            previous_index: r.previous_index,
            events: r
                .events
                .into_iter()
                .map(|event| ProtoEvent {
                    name: event.name,
                    payload: event.payload.to_vec(),
                })
                .collect(),
        }),
    };

    ProtoRequest { body: Some(body) }
}

pub(super) fn request_from_proto(proto: ProtoRequest) -> Result<Request, TransportError> {
    let request = match proto.body.ok_or_else(|| malformed("request body"))? {
        proto_request::Body::Vote(r) => Request::Vote(VoteRequest {
            term: r.term,
            candidate: Address::new(r.candidate),
            last_log_index: r.last_log_entry_index,
            last_log_term: r.last_log_entry_term,
        }),
        proto_request::Body::Append(r) => Request::Append(AppendRequest {
            term: r.term,
            leader: Address::new(r.leader),
            previous_log_index: r.previous_log_entry_index,
            previous_log_term: r.previous_log_entry_term,
            previous_is_base: r.previous_is_base,
            entries: r
                .new_entries
                .into_iter()
                .map(|entry| WireEntry {
                    term: entry.term,
                    data: Bytes::from(entry.data),
                })
                .collect(),
            commit_index: r.commit_index,
            global_index: r.global_index,
        }),
        proto_request::Body::TimeoutNow(r) => Request::TimeoutNow(TimeoutNowRequest {
            term: r.term,
            leader: Address::new(r.leader),
        }),
        proto_request::Body::Join(r) => Request::Join(JoinRequest {
            member: Address::new(r.member),
        }),
        proto_request::Body::Leave(r) => Request::Leave(LeaveRequest {
            member: Address::new(r.member),
        }),
        proto_request::Body::OpenSession(r) => Request::OpenSession(OpenSessionRequest {
            client_id: r.client_id,
            client_address: opt_address(r.client_address),
        }),
        proto_request::Body::KeepAlive(r) => Request::KeepAlive(KeepAliveRequest {
            session_id: SessionId::new(r.session_id),
            command_sequence: r.command_sequence,
            event_index: r.event_index,
        }),
        proto_request::Body::Command(r) => Request::Command(CommandRequest {
            session_id: SessionId::new(r.session_id),
            sequence: r.sequence,
            operation: operation_from_proto(r.operation)?,
            consistency: command_consistency_from_proto(r.consistency)?,
        }),
        proto_request::Body::Query(r) => Request::Query(QueryRequest {
            session_id: SessionId::new(r.session_id),
            sequence: r.sequence,
            index: r.index,
            operation: operation_from_proto(r.operation)?,
            consistency: query_consistency_from_proto(r.consistency)?,
        }),
        proto_request::Body::CloseSession(r) => Request::CloseSession(CloseSessionRequest {
            session_id: SessionId::new(r.session_id),
        }),
        proto_request::Body::Publish(r) => Request::Publish(PublishRequest {
            session_id: SessionId::new(r.session_id),
            event_index: r.event_index,
            previous_index: r.previous_index,
            events: r
                .events
                .into_iter()
                .map(|event| PublishedEvent {
                    name: event.name,
                    payload: Bytes::from(event.payload),
                })
                .collect(),
        }),
    };

    Ok(request)
}

fn operation_to_proto(operation: Operation) -> ProtoOperation {
    ProtoOperation {
        op_type: operation.op_type,
        payload: operation.payload.to_vec(),
    }
}

fn operation_from_proto(operation: Option<ProtoOperation>) -> Result<Operation, TransportError> {
    let operation = operation.ok_or_else(|| malformed("operation"))?;
    Ok(Operation::new(operation.op_type, operation.payload))
}

fn command_consistency_to_proto(consistency: CommandConsistency) -> ProtoCommandConsistency {
    match consistency {
        CommandConsistency::None => ProtoCommandConsistency::CommandNone,
        CommandConsistency::Sequential => ProtoCommandConsistency::CommandSequential,
        CommandConsistency::Linearizable => ProtoCommandConsistency::CommandLinearizable,
    }
}

fn command_consistency_from_proto(value: i32) -> Result<CommandConsistency, TransportError> {
    match ProtoCommandConsistency::from_i32(value) {
        Some(ProtoCommandConsistency::CommandNone) => Ok(CommandConsistency::None),
        Some(ProtoCommandConsistency::CommandSequential) => Ok(CommandConsistency::Sequential),
        Some(ProtoCommandConsistency::CommandLinearizable) => Ok(CommandConsistency::Linearizable),
        None => Err(malformed("command consistency")),
    }
}

fn query_consistency_to_proto(consistency: QueryConsistency) -> ProtoQueryConsistency {
    match consistency {
        QueryConsistency::Causal => ProtoQueryConsistency::QueryCausal,
        QueryConsistency::Sequential => ProtoQueryConsistency::QuerySequential,
        QueryConsistency::BoundedLinearizable => ProtoQueryConsistency::QueryBoundedLinearizable,
        QueryConsistency::Linearizable => ProtoQueryConsistency::QueryLinearizable,
    }
}

fn query_consistency_from_proto(value: i32) -> Result<QueryConsistency, TransportError> {
    match ProtoQueryConsistency::from_i32(value) {
        Some(ProtoQueryConsistency::QueryCausal) => Ok(QueryConsistency::Causal),
        Some(ProtoQueryConsistency::QuerySequential) => Ok(QueryConsistency::Sequential),
        Some(ProtoQueryConsistency::QueryBoundedLinearizable) => Ok(QueryConsistency::BoundedLinearizable),
        Some(ProtoQueryConsistency::QueryLinearizable) => Ok(QueryConsistency::Linearizable),
        None => Err(malformed("query consistency")),
    }
}

// ------- Responses --------

pub(super) fn response_to_proto(response: Response) -> ProtoResponse {
    let body = match response {
        Response::Vote(result) => proto_response::Body::Vote(ProtoVoteResult {
            result: Some(match result {
                Ok(ok) => proto_vote_result::Result::Ok(ProtoVoteSuccess {
                    vote_granted: ok.vote_granted,
                }),
                Err(e) => proto_vote_result::Result::Err(peer_error_to_proto(e)),
            }),
        }),
        Response::Append(result) => proto_response::Body::Append(ProtoAppendResult {
            result: Some(match result {
                Ok(ok) => proto_append_result::Result::Ok(ProtoAppendSuccess {
                    last_log_entry_index: ok.last_log_index,
                    low_water_index: ok.low_water_index,
                }),
                Err(e) => proto_append_result::Result::Err(peer_error_to_proto(e)),
            }),
        }),
        Response::TimeoutNow(result) => proto_response::Body::TimeoutNow(ProtoTimeoutNowResult {
            result: Some(match result {
                Ok(_) => proto_timeout_now_result::Result::Ok(ProtoEmpty {}),
                Err(e) => proto_timeout_now_result::Result::Err(peer_error_to_proto(e)),
            }),
        }),
        Response::Join(reply) => proto_response::Body::Join(reply_to_proto(reply, |ok| ProtoReplySuccess {
            index: ok.configuration_index,
            ..ProtoReplySuccess::default()
        })),
        Response::Leave(reply) => proto_response::Body::Leave(reply_to_proto(reply, |ok| ProtoReplySuccess {
            index: ok.configuration_index,
            ..ProtoReplySuccess::default()
        })),
        Response::OpenSession(reply) => {
            proto_response::Body::OpenSession(reply_to_proto(reply, |ok| ProtoReplySuccess {
                session_id: ok.session_id.as_u64(),
                timeout_ms: ok.timeout_ms,
                ..ProtoReplySuccess::default()
            }))
        }
        Response::KeepAlive(reply) => {
            proto_response::Body::KeepAlive(reply_to_proto(reply, |_| ProtoReplySuccess::default()))
        }
        Response::Command(reply) => proto_response::Body::Command(reply_to_proto(reply, |ok| ProtoReplySuccess {
            index: ok.index,
            event_index: ok.event_index,
            output: ok.output.to_vec(),
            ..ProtoReplySuccess::default()
        })),
        Response::Query(reply) => proto_response::Body::Query(reply_to_proto(reply, |ok| ProtoReplySuccess {
            index: ok.index,
            event_index: ok.event_index,
            output: ok.output.to_vec(),
            ..ProtoReplySuccess::default()
        })),
        Response::CloseSession(reply) => {
            proto_response::Body::CloseSession(reply_to_proto(reply, |_| ProtoReplySuccess::default()))
        }
        Response::Publish(result) => proto_response::Body::Publish(ProtoPublishResult {
            result: Some(match result {
                Ok(ok) => proto_publish_result::Result::Ok(ProtoPublishSuccess {
                    event_index: ok.event_index,
                }),
                Err(e) => proto_publish_result::Result::Err(protocol_error_to_proto(e)),
            }),
        }),
        Response::Unsupported => proto_response::Body::Unsupported(ProtoUnsupported {}),
    };

    ProtoResponse { body: Some(body) }
}

pub(super) fn response_from_proto(proto: ProtoResponse) -> Result<Response, TransportError> {
    let response = match proto.body.ok_or_else(|| malformed("response body"))? {
        proto_response::Body::Vote(result) => Response::Vote(match result.result {
            Some(proto_vote_result::Result::Ok(ok)) => Ok(VoteOk {
                vote_granted: ok.vote_granted,
            }),
            Some(proto_vote_result::Result::Err(e)) => Err(peer_error_from_proto(e)?),
            None => return Err(malformed("vote result")),
        }),
        proto_response::Body::Append(result) => Response::Append(match result.result {
            Some(proto_append_result::Result::Ok(ok)) => Ok(AppendOk {
                last_log_index: ok.last_log_entry_index,
                low_water_index: ok.low_water_index,
            }),
            Some(proto_append_result::Result::Err(e)) => Err(peer_error_from_proto(e)?),
            None => return Err(malformed("append result")),
        }),
        proto_response::Body::TimeoutNow(result) => Response::TimeoutNow(match result.result {
            Some(proto_timeout_now_result::Result::Ok(_)) => Ok(TimeoutNowOk {}),
            Some(proto_timeout_now_result::Result::Err(e)) => Err(peer_error_from_proto(e)?),
            None => return Err(malformed("timeout now result")),
        }),
        proto_response::Body::Join(reply) => Response::Join(reply_from_proto(reply, |ok| JoinOk {
            configuration_index: ok.index,
        })?),
        proto_response::Body::Leave(reply) => Response::Leave(reply_from_proto(reply, |ok| LeaveOk {
            configuration_index: ok.index,
        })?),
        proto_response::Body::OpenSession(reply) => Response::OpenSession(reply_from_proto(reply, |ok| {
            OpenSessionOk {
                session_id: SessionId::new(ok.session_id),
                timeout_ms: ok.timeout_ms,
            }
        })?),
        proto_response::Body::KeepAlive(reply) => Response::KeepAlive(reply_from_proto(reply, |_| KeepAliveOk {})?),
        proto_response::Body::Command(reply) => Response::Command(reply_from_proto(reply, |ok| CommandOk {
            index: ok.index,
            event_index: ok.event_index,
            output: Bytes::from(ok.output),
        })?),
        proto_response::Body::Query(reply) => Response::Query(reply_from_proto(reply, |ok| QueryOk {
            index: ok.index,
            event_index: ok.event_index,
            output: Bytes::from(ok.output),
        })?),
        proto_response::Body::CloseSession(reply) => {
            Response::CloseSession(reply_from_proto(reply, |_| CloseSessionOk {})?)
        }
        proto_response::Body::Publish(result) => Response::Publish(match result.result {
            Some(proto_publish_result::Result::Ok(ok)) => Ok(PublishOk {
                event_index: ok.event_index,
            }),
            Some(proto_publish_result::Result::Err(e)) => Err(protocol_error_from_proto(e)?),
            None => return Err(malformed("publish result")),
        }),
        proto_response::Body::Unsupported(_) => Response::Unsupported,
    };

    Ok(response)
}

fn reply_to_proto<T, F>(reply: Reply<T>, convert_ok: F) -> ProtoReply
where
    F: FnOnce(T) -> ProtoReplySuccess,
{
    let result = match reply.outcome {
        Ok(ok) => proto_reply::Result::Ok(convert_ok(ok)),
        Err(e) => proto_reply::Result::Err(protocol_error_to_proto(e)),
    };

    ProtoReply {
        leader: address_or_empty(reply.leader),
        members: reply.members.into_iter().map(Address::into_inner).collect(),
        result: Some(result),
    }
}

fn reply_from_proto<T, F>(proto: ProtoReply, convert_ok: F) -> Result<Reply<T>, TransportError>
where
    F: FnOnce(ProtoReplySuccess) -> T,
{
    let outcome = match proto.result {
        Some(proto_reply::Result::Ok(ok)) => Ok(convert_ok(ok)),
        Some(proto_reply::Result::Err(e)) => Err(protocol_error_from_proto(e)?),
        None => return Err(malformed("reply result")),
    };

    Ok(Reply {
        leader: opt_address(proto.leader),
        members: proto.members.into_iter().map(Address::new).collect(),
        outcome,
    })
}

fn peer_error_to_proto(error: PeerError) -> ProtoPeerError {
    let err = match error {
        PeerError::StaleTerm { current_term } => proto_peer_error::Err::StaleTerm(ProtoStaleTerm { current_term }),
        PeerError::MissingPreviousEntry { last_log_index } => {
            proto_peer_error::Err::MissingLog(ProtoMissingLog {
                last_log_entry_index: last_log_index,
            })
        }
        PeerError::NotInCluster => proto_peer_error::Err::NotInCluster(ProtoEmpty {}),
        PeerError::ServerFault(message) => proto_peer_error::Err::ServerFault(ProtoServerFault { message }),
    };

    ProtoPeerError { err: Some(err) }
}

fn peer_error_from_proto(proto: ProtoPeerError) -> Result<PeerError, TransportError> {
    match proto.err.ok_or_else(|| malformed("peer error"))? {
        proto_peer_error::Err::StaleTerm(e) => Ok(PeerError::StaleTerm {
            current_term: e.current_term,
        }),
        proto_peer_error::Err::MissingLog(e) => Ok(PeerError::MissingPreviousEntry {
            last_log_index: e.last_log_entry_index,
        }),
        proto_peer_error::Err::NotInCluster(_) => Ok(PeerError::NotInCluster),
        proto_peer_error::Err::ServerFault(e) => Ok(PeerError::ServerFault(e.message)),
    }
}

fn protocol_error_to_proto(error: ProtocolError) -> ProtoClientError {
    let err = match error {
        ProtocolError::NotLeader => proto_client_error::Err::NotLeader(ProtoEmpty {}),
        ProtocolError::UnknownSession => proto_client_error::Err::UnknownSession(ProtoEmpty {}),
        ProtocolError::ConfigurationChangeInProgress => {
            proto_client_error::Err::ConfigurationChangeInProgress(ProtoEmpty {})
        }
        ProtocolError::Application(message) => proto_client_error::Err::Application(ProtoServerFault { message }),
        ProtocolError::Internal(message) => proto_client_error::Err::Internal(ProtoServerFault { message }),
    };

    ProtoClientError { err: Some(err) }
}

fn protocol_error_from_proto(proto: ProtoClientError) -> Result<ProtocolError, TransportError> {
    match proto.err.ok_or_else(|| malformed("client error"))? {
        proto_client_error::Err::NotLeader(_) => Ok(ProtocolError::NotLeader),
        proto_client_error::Err::UnknownSession(_) => Ok(ProtocolError::UnknownSession),
        proto_client_error::Err::ConfigurationChangeInProgress(_) => Ok(ProtocolError::ConfigurationChangeInProgress),
        proto_client_error::Err::Application(e) => Ok(ProtocolError::Application(e.message)),
        proto_client_error::Err::Internal(e) => Ok(ProtocolError::Internal(e.message)),
    }
}
