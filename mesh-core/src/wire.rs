//! Overlay frames. Every connection carries whole frames: a little-endian `u32` body length
//! followed by one JSON-encoded [`Message`]. Bodies over [`MAX_FRAME_LEN`] are refused on both
//! sides, so a bad length prefix never makes a node allocate more than that.

use crate::protocol::Message;

/// Width of the body-length prefix.
pub const LEN_SIZE: usize = 4;

/// Largest accepted JSON body.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("cannot serialize message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("message body of {0} bytes exceeds the frame limit")]
    TooLarge(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    /// The buffer ends inside the prefix or the body.
    #[error("incomplete frame")]
    NeedMore,
    #[error("announced body of {0} bytes exceeds the frame limit")]
    TooLarge(usize),
    #[error("malformed message body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Serialize `msg` and prepend its body length.
pub fn encode_frame(msg: &Message) -> Result<Vec<u8>, FrameEncodeError> {
    let body = serde_json::to_vec(msg)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(FrameEncodeError::TooLarge(body.len()));
    }
    let mut frame = (body.len() as u32).to_le_bytes().to_vec();
    frame.extend(body);
    Ok(frame)
}

/// Body length announced by a prefix read off the socket.
pub fn payload_len(header: [u8; LEN_SIZE]) -> Result<usize, FrameDecodeError> {
    match u32::from_le_bytes(header) as usize {
        len if len > MAX_FRAME_LEN => Err(FrameDecodeError::TooLarge(len)),
        len => Ok(len),
    }
}

/// Parse a body whose prefix was already consumed.
pub fn decode_payload(body: &[u8]) -> Result<Message, FrameDecodeError> {
    Ok(serde_json::from_slice(body)?)
}

/// Split the first frame off `bytes`, returning its message and the bytes it used.
/// [`FrameDecodeError::NeedMore`] means the frame is not complete yet.
pub fn decode_frame(bytes: &[u8]) -> Result<(Message, usize), FrameDecodeError> {
    let Some((header, rest)) = bytes.split_first_chunk::<LEN_SIZE>() else {
        return Err(FrameDecodeError::NeedMore);
    };
    let len = payload_len(*header)?;
    let body = rest.get(..len).ok_or(FrameDecodeError::NeedMore)?;
    Ok((decode_payload(body)?, LEN_SIZE + len))
}
