//! Login packets

use crate::protocol::codec::{BufferReader, BufferWriter, CodecError};

use super::{ClientPacket, ServerPacket};

/// Client credentials. Password checking belongs to the external account
/// store; the engine only needs the username resolved.
#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub password: Option<String>,
    pub remember_me: bool,
}

impl ClientPacket for LoginRequest {
    const ID: i32 = -739_684_591;
    const NAME: &'static str = "LoginRequest";

    fn read(r: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            username: r.read_optional_string()?,
            password: r.read_optional_string()?,
            remember_me: r.read_u8()? != 0,
        })
    }
}

#[derive(Debug, Clone)]
pub struct LoginAccepted {
    pub username: Option<String>,
    pub rank: i32,
}

impl ServerPacket for LoginAccepted {
    const ID: i32 = 339_680_338;
    const NAME: &'static str = "LoginAccepted";

    fn write(&self, w: &mut BufferWriter) {
        w.write_optional_string(self.username.as_deref());
        w.write_i32(self.rank);
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoginFailed;

impl ServerPacket for LoginFailed {
    const ID: i32 = -1_631_349_656;
    const NAME: &'static str = "LoginFailed";

    fn write(&self, _w: &mut BufferWriter) {}
}
