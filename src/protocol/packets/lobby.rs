//! Lobby and garage packets: battle browsing, creation, view switching

use crate::protocol::codec::{BufferReader, BufferWriter, CodecError};

use super::{ClientPacket, ServerPacket};

/// Request the details of a battle in the list
#[derive(Debug, Clone)]
pub struct SelectBattle {
    pub battle_id: Option<String>,
}

impl ClientPacket for SelectBattle {
    const ID: i32 = 2_092_412_133;
    const NAME: &'static str = "SelectBattle";

    fn read(r: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            battle_id: r.read_optional_string()?,
        })
    }
}

/// Battle creation form as submitted by the client
#[derive(Debug, Clone)]
pub struct CreateBattleRequest {
    pub name: Option<String>,
    pub private_battle: bool,
    pub battle_mode: i32,
    pub map_id: Option<String>,
    pub max_people_count: i32,
    pub min_rank: i32,
    pub max_rank: i32,
    pub time_limit_secs: i32,
    pub score_limit: i32,
    pub auto_balance: bool,
    pub friendly_fire: bool,
    pub parkour_mode: bool,
}

impl ClientPacket for CreateBattleRequest {
    const ID: i32 = -2_135_234_305;
    const NAME: &'static str = "CreateBattleRequest";

    fn read(r: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            name: r.read_optional_string()?,
            private_battle: r.read_u8()? != 0,
            battle_mode: r.read_i32()?,
            map_id: r.read_optional_string()?,
            max_people_count: r.read_i32()?,
            min_rank: r.read_i32()?,
            max_rank: r.read_i32()?,
            time_limit_secs: r.read_i32()?,
            score_limit: r.read_i32()?,
            auto_balance: r.read_u8()? != 0,
            friendly_fire: r.read_u8()? != 0,
            parkour_mode: r.read_u8()? != 0,
        })
    }
}

/// New battle announcement for everyone browsing the battle list. The
/// payload is a JSON battle summary.
#[derive(Debug, Clone)]
pub struct BattleCreated {
    pub json: Option<String>,
}

impl ServerPacket for BattleCreated {
    const ID: i32 = -2_043_703_131;
    const NAME: &'static str = "BattleCreated";

    fn write(&self, w: &mut BufferWriter) {
        w.write_optional_string(self.json.as_deref());
    }
}

/// Detail view of the currently selected battle (JSON payload)
#[derive(Debug, Clone)]
pub struct BattleDetails {
    pub json: Option<String>,
}

impl ServerPacket for BattleDetails {
    const ID: i32 = 807_366_810;
    const NAME: &'static str = "BattleDetails";

    fn write(&self, w: &mut BufferWriter) {
        w.write_optional_string(self.json.as_deref());
    }
}

/// Lobby view toggle. Meaning depends on the session state: inside a battle
/// it flips between the battle view and the battle-list overlay.
#[derive(Debug, Clone, Default)]
pub struct RequestLobby;

impl ClientPacket for RequestLobby {
    const ID: i32 = -1_276_139_496;
    const NAME: &'static str = "RequestLobby";

    fn read(_r: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        Ok(Self)
    }
}

/// Garage view toggle, symmetric to [`RequestLobby`]
#[derive(Debug, Clone, Default)]
pub struct RequestGarage;

impl ClientPacket for RequestGarage {
    const ID: i32 = 1_211_276_187;
    const NAME: &'static str = "RequestGarage";

    fn read(_r: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        Ok(Self)
    }
}

/// Mount a garage item onto the tank. Item business rules live outside this
/// server; an in-battle mount only marks the tank for an equipment
/// rebroadcast on its next placement.
#[derive(Debug, Clone)]
pub struct MountItem {
    pub item_id: Option<String>,
}

impl ClientPacket for MountItem {
    const ID: i32 = -1_505_793_493;
    const NAME: &'static str = "MountItem";

    fn read(r: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            item_id: r.read_optional_string()?,
        })
    }
}
