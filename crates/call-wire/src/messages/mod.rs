//! IQ packet catalog.
//!
//! Every sideband message exchanged over an established P2P data channel is
//! one of the fixed-schema records below, identified by a stable 128-bit
//! schema id and decoded exactly once into the [`IqMessage`] sum type before
//! dispatch. Most of these are one-way notifications; the request id is
//! carried for envelope consistency, not application-level correlation.

pub mod camera;
pub mod hold;
pub mod keycheck;
pub mod participant;
pub mod streaming;
pub mod transfer;

pub use camera::{CameraControlIq, CameraError, CameraMode, CameraResponseIq};
pub use hold::{HoldCallIq, ResumeCallIq};
pub use keycheck::{
    KeyCheckInitiateIq, KeyCheckOnInitiateIq, KeyCheckTerminateIq, KeyCheckWordCheckIq,
    TwincodeUriIq,
};
pub use participant::{ParticipantInfoIq, ParticipantTransferIq};
pub use streaming::{
    StreamingControlIq, StreamingDataIq, StreamingInfoIq, StreamingOp, StreamingRequestIq,
};
pub use transfer::{OnPrepareTransferIq, PrepareTransferIq, TransferDoneIq};

use bytes::Bytes;
use uuid::Uuid;

use crate::codec::{Decoder, Envelope};
use crate::error::{WireError, WireResult};

/// One decoded IQ packet.
///
/// A closed sum type: decoding a frame whose schema id is not in this
/// catalog fails with [`WireError::UnknownSchema`].
#[derive(Debug, Clone, PartialEq)]
pub enum IqMessage {
    /// Announce/update the sender's display identity to a call-room peer
    ParticipantInfo(ParticipantInfoIq),
    /// "I am being replaced by member X"
    ParticipantTransfer(ParticipantTransferIq),
    /// Transfer phase 1: forewarn an existing participant
    PrepareTransfer(PrepareTransferIq),
    /// Transfer phase 1 acknowledgement
    OnPrepareTransfer(OnPrepareTransferIq),
    /// Transfer phase 2: the target tells the outgoing device to disconnect
    TransferDone(TransferDoneIq),
    /// Peer put the call on hold
    HoldCall(HoldCallIq),
    /// Peer resumed the call
    ResumeCall(ResumeCallIq),
    /// Remote camera control request
    CameraControl(CameraControlIq),
    /// Remote camera control response/ack
    CameraResponse(CameraResponseIq),
    /// Streaming side-channel control
    StreamingControl(StreamingControlIq),
    /// Streaming side-channel data chunk
    StreamingData(StreamingDataIq),
    /// Streaming side-channel track description
    StreamingInfo(StreamingInfoIq),
    /// Streaming side-channel pull request
    StreamingRequest(StreamingRequestIq),
    /// Key verification: start the word-check handshake
    KeyCheckInitiate(KeyCheckInitiateIq),
    /// Key verification: handshake acknowledgement
    KeyCheckOnInitiate(KeyCheckOnInitiateIq),
    /// Key verification: per-word confirmation
    KeyCheckWordCheck(KeyCheckWordCheckIq),
    /// Key verification: handshake outcome
    KeyCheckTerminate(KeyCheckTerminateIq),
    /// Twincode URI exchange during key verification
    TwincodeUri(TwincodeUriIq),
}

fn check_version(env: &Envelope, supported: i32) -> WireResult<()> {
    if env.schema_version > supported {
        return Err(WireError::UnsupportedVersion {
            schema_id: env.schema_id,
            found: env.schema_version,
            supported,
        });
    }
    Ok(())
}

impl IqMessage {
    /// Decode one frame received from the data channel.
    pub fn decode(frame: Bytes) -> WireResult<IqMessage> {
        let mut dec = Decoder::new(frame);
        let env = dec.envelope()?;
        let id = env.schema_id;
        let rid = env.request_id;

        if id == ParticipantInfoIq::SCHEMA_ID {
            check_version(&env, ParticipantInfoIq::SCHEMA_VERSION)?;
            Ok(IqMessage::ParticipantInfo(ParticipantInfoIq::decode_payload(&mut dec, rid)?))
        } else if id == ParticipantTransferIq::SCHEMA_ID {
            check_version(&env, ParticipantTransferIq::SCHEMA_VERSION)?;
            Ok(IqMessage::ParticipantTransfer(ParticipantTransferIq::decode_payload(&mut dec, rid)?))
        } else if id == PrepareTransferIq::SCHEMA_ID {
            check_version(&env, PrepareTransferIq::SCHEMA_VERSION)?;
            Ok(IqMessage::PrepareTransfer(PrepareTransferIq { request_id: rid }))
        } else if id == OnPrepareTransferIq::SCHEMA_ID {
            check_version(&env, OnPrepareTransferIq::SCHEMA_VERSION)?;
            Ok(IqMessage::OnPrepareTransfer(OnPrepareTransferIq { request_id: rid }))
        } else if id == TransferDoneIq::SCHEMA_ID {
            check_version(&env, TransferDoneIq::SCHEMA_VERSION)?;
            Ok(IqMessage::TransferDone(TransferDoneIq { request_id: rid }))
        } else if id == HoldCallIq::SCHEMA_ID {
            check_version(&env, HoldCallIq::SCHEMA_VERSION)?;
            Ok(IqMessage::HoldCall(HoldCallIq { request_id: rid }))
        } else if id == ResumeCallIq::SCHEMA_ID {
            check_version(&env, ResumeCallIq::SCHEMA_VERSION)?;
            Ok(IqMessage::ResumeCall(ResumeCallIq { request_id: rid }))
        } else if id == CameraControlIq::SCHEMA_ID {
            check_version(&env, CameraControlIq::SCHEMA_VERSION)?;
            Ok(IqMessage::CameraControl(CameraControlIq::decode_payload(&mut dec, rid)?))
        } else if id == CameraResponseIq::SCHEMA_ID {
            check_version(&env, CameraResponseIq::SCHEMA_VERSION)?;
            Ok(IqMessage::CameraResponse(CameraResponseIq::decode_payload(&mut dec, rid)?))
        } else if id == StreamingControlIq::SCHEMA_ID {
            check_version(&env, StreamingControlIq::SCHEMA_VERSION)?;
            Ok(IqMessage::StreamingControl(StreamingControlIq::decode_payload(&mut dec, rid)?))
        } else if id == StreamingDataIq::SCHEMA_ID {
            check_version(&env, StreamingDataIq::SCHEMA_VERSION)?;
            Ok(IqMessage::StreamingData(StreamingDataIq::decode_payload(&mut dec, rid)?))
        } else if id == StreamingInfoIq::SCHEMA_ID {
            check_version(&env, StreamingInfoIq::SCHEMA_VERSION)?;
            Ok(IqMessage::StreamingInfo(StreamingInfoIq::decode_payload(&mut dec, rid)?))
        } else if id == StreamingRequestIq::SCHEMA_ID {
            check_version(&env, StreamingRequestIq::SCHEMA_VERSION)?;
            Ok(IqMessage::StreamingRequest(StreamingRequestIq::decode_payload(&mut dec, rid)?))
        } else if id == KeyCheckInitiateIq::SCHEMA_ID {
            check_version(&env, KeyCheckInitiateIq::SCHEMA_VERSION)?;
            Ok(IqMessage::KeyCheckInitiate(KeyCheckInitiateIq::decode_payload(&mut dec, rid)?))
        } else if id == KeyCheckOnInitiateIq::SCHEMA_ID {
            check_version(&env, KeyCheckOnInitiateIq::SCHEMA_VERSION)?;
            Ok(IqMessage::KeyCheckOnInitiate(KeyCheckOnInitiateIq::decode_payload(&mut dec, rid)?))
        } else if id == KeyCheckWordCheckIq::SCHEMA_ID {
            check_version(&env, KeyCheckWordCheckIq::SCHEMA_VERSION)?;
            Ok(IqMessage::KeyCheckWordCheck(KeyCheckWordCheckIq::decode_payload(&mut dec, rid)?))
        } else if id == KeyCheckTerminateIq::SCHEMA_ID {
            check_version(&env, KeyCheckTerminateIq::SCHEMA_VERSION)?;
            Ok(IqMessage::KeyCheckTerminate(KeyCheckTerminateIq::decode_payload(&mut dec, rid)?))
        } else if id == TwincodeUriIq::SCHEMA_ID {
            check_version(&env, TwincodeUriIq::SCHEMA_VERSION)?;
            Ok(IqMessage::TwincodeUri(TwincodeUriIq::decode_payload(&mut dec, rid)?))
        } else {
            Err(WireError::UnknownSchema { schema_id: id })
        }
    }

    /// Encode this message into one data-channel frame.
    pub fn encode(&self) -> Bytes {
        match self {
            IqMessage::ParticipantInfo(m) => m.encode(),
            IqMessage::ParticipantTransfer(m) => m.encode(),
            IqMessage::PrepareTransfer(m) => m.encode(),
            IqMessage::OnPrepareTransfer(m) => m.encode(),
            IqMessage::TransferDone(m) => m.encode(),
            IqMessage::HoldCall(m) => m.encode(),
            IqMessage::ResumeCall(m) => m.encode(),
            IqMessage::CameraControl(m) => m.encode(),
            IqMessage::CameraResponse(m) => m.encode(),
            IqMessage::StreamingControl(m) => m.encode(),
            IqMessage::StreamingData(m) => m.encode(),
            IqMessage::StreamingInfo(m) => m.encode(),
            IqMessage::StreamingRequest(m) => m.encode(),
            IqMessage::KeyCheckInitiate(m) => m.encode(),
            IqMessage::KeyCheckOnInitiate(m) => m.encode(),
            IqMessage::KeyCheckWordCheck(m) => m.encode(),
            IqMessage::KeyCheckTerminate(m) => m.encode(),
            IqMessage::TwincodeUri(m) => m.encode(),
        }
    }

    /// Request id carried by the envelope.
    pub fn request_id(&self) -> i64 {
        match self {
            IqMessage::ParticipantInfo(m) => m.request_id,
            IqMessage::ParticipantTransfer(m) => m.request_id,
            IqMessage::PrepareTransfer(m) => m.request_id,
            IqMessage::OnPrepareTransfer(m) => m.request_id,
            IqMessage::TransferDone(m) => m.request_id,
            IqMessage::HoldCall(m) => m.request_id,
            IqMessage::ResumeCall(m) => m.request_id,
            IqMessage::CameraControl(m) => m.request_id,
            IqMessage::CameraResponse(m) => m.request_id,
            IqMessage::StreamingControl(m) => m.request_id,
            IqMessage::StreamingData(m) => m.request_id,
            IqMessage::StreamingInfo(m) => m.request_id,
            IqMessage::StreamingRequest(m) => m.request_id,
            IqMessage::KeyCheckInitiate(m) => m.request_id,
            IqMessage::KeyCheckOnInitiate(m) => m.request_id,
            IqMessage::KeyCheckWordCheck(m) => m.request_id,
            IqMessage::KeyCheckTerminate(m) => m.request_id,
            IqMessage::TwincodeUri(m) => m.request_id,
        }
    }

    /// Schema id of the contained message.
    pub fn schema_id(&self) -> Uuid {
        match self {
            IqMessage::ParticipantInfo(_) => ParticipantInfoIq::SCHEMA_ID,
            IqMessage::ParticipantTransfer(_) => ParticipantTransferIq::SCHEMA_ID,
            IqMessage::PrepareTransfer(_) => PrepareTransferIq::SCHEMA_ID,
            IqMessage::OnPrepareTransfer(_) => OnPrepareTransferIq::SCHEMA_ID,
            IqMessage::TransferDone(_) => TransferDoneIq::SCHEMA_ID,
            IqMessage::HoldCall(_) => HoldCallIq::SCHEMA_ID,
            IqMessage::ResumeCall(_) => ResumeCallIq::SCHEMA_ID,
            IqMessage::CameraControl(_) => CameraControlIq::SCHEMA_ID,
            IqMessage::CameraResponse(_) => CameraResponseIq::SCHEMA_ID,
            IqMessage::StreamingControl(_) => StreamingControlIq::SCHEMA_ID,
            IqMessage::StreamingData(_) => StreamingDataIq::SCHEMA_ID,
            IqMessage::StreamingInfo(_) => StreamingInfoIq::SCHEMA_ID,
            IqMessage::StreamingRequest(_) => StreamingRequestIq::SCHEMA_ID,
            IqMessage::KeyCheckInitiate(_) => KeyCheckInitiateIq::SCHEMA_ID,
            IqMessage::KeyCheckOnInitiate(_) => KeyCheckOnInitiateIq::SCHEMA_ID,
            IqMessage::KeyCheckWordCheck(_) => KeyCheckWordCheckIq::SCHEMA_ID,
            IqMessage::KeyCheckTerminate(_) => KeyCheckTerminateIq::SCHEMA_ID,
            IqMessage::TwincodeUri(_) => TwincodeUriIq::SCHEMA_ID,
        }
    }
}
