//! In-battle packets: entry/exit, spawn cycle, movement, destruction,
//! flags, capture points, battle chat

use crate::protocol::codec::{BufferReader, BufferWriter, CodecError};
use crate::protocol::Vector3;

use super::{ClientPacket, ServerPacket};

// ---------------------------------------------------------------------------
// Entry / exit
// ---------------------------------------------------------------------------

/// Join the previously selected battle as a combatant
#[derive(Debug, Clone)]
pub struct EnterBattle {
    /// Requested team: 0 = red, 1 = blue, 2 = none (free-for-all or
    /// auto-balance)
    pub team: i8,
}

impl ClientPacket for EnterBattle {
    const ID: i32 = -1_448_567_192;
    const NAME: &'static str = "EnterBattle";

    fn read(r: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        Ok(Self { team: r.read_i8()? })
    }
}

/// Join the previously selected battle as a spectator
#[derive(Debug, Clone, Default)]
pub struct EnterBattleAsSpectator;

impl ClientPacket for EnterBattleAsSpectator {
    const ID: i32 = 1_153_163_985;
    const NAME: &'static str = "EnterBattleAsSpectator";

    fn read(_r: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        Ok(Self)
    }
}

/// Leave the battle. `layout` selects the screen to land on: 0 = lobby,
/// 1 = garage.
#[derive(Debug, Clone)]
pub struct ExitFromBattle {
    pub layout: i32,
}

impl ClientPacket for ExitFromBattle {
    const ID: i32 = -1_128_606_444;
    const NAME: &'static str = "ExitFromBattle";

    fn read(r: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            layout: r.read_i32()?,
        })
    }
}

/// Tells the client to tear down the battle scene after an exit
#[derive(Debug, Clone, Default)]
pub struct UnloadBattle;

impl ServerPacket for UnloadBattle {
    const ID: i32 = 1_411_656_080;
    const NAME: &'static str = "UnloadBattle";

    fn write(&self, _w: &mut BufferWriter) {}
}

/// A combatant left the battle; remove their tank from the scene
#[derive(Debug, Clone)]
pub struct RemoveTank {
    pub nickname: Option<String>,
}

impl ServerPacket for RemoveTank {
    const ID: i32 = 1_219_384_537;
    const NAME: &'static str = "RemoveTank";

    fn write(&self, w: &mut BufferWriter) {
        w.write_optional_string(self.nickname.as_deref());
    }
}

// ---------------------------------------------------------------------------
// Spawn cycle
// ---------------------------------------------------------------------------

/// Phase one of the spawn sequence: client asks for a spawn location
#[derive(Debug, Clone, Default)]
pub struct ReadyToSpawn;

impl ClientPacket for ReadyToSpawn {
    const ID: i32 = -1_958_341_033;
    const NAME: &'static str = "ReadyToSpawn";

    fn read(_r: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        Ok(Self)
    }
}

/// Spawn location preview sent while the reservation is held server-side
#[derive(Debug, Clone)]
pub struct PrepareToSpawn {
    pub position: Option<Vector3>,
    pub rotation: Option<Vector3>,
}

impl ServerPacket for PrepareToSpawn {
    const ID: i32 = 875_259_457;
    const NAME: &'static str = "PrepareToSpawn";

    fn write(&self, w: &mut BufferWriter) {
        w.write_optional_vector3(self.position);
        w.write_optional_vector3(self.rotation);
    }
}

/// Phase two: client confirms placement at the reserved location
#[derive(Debug, Clone, Default)]
pub struct ReadyToPlace;

impl ClientPacket for ReadyToPlace {
    const ID: i32 = 1_813_260_224;
    const NAME: &'static str = "ReadyToPlace";

    fn read(_r: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        Ok(Self)
    }
}

/// Authoritative spawn event, broadcast to every participant
#[derive(Debug, Clone)]
pub struct SpawnTank {
    pub nickname: Option<String>,
    /// 0 = red, 1 = blue, 2 = no team
    pub team: i8,
    pub position: Option<Vector3>,
    pub orientation: Option<Vector3>,
    pub health: i32,
    pub incarnation: u16,
}

impl ServerPacket for SpawnTank {
    const ID: i32 = -744_300_243;
    const NAME: &'static str = "SpawnTank";

    fn write(&self, w: &mut BufferWriter) {
        w.write_optional_string(self.nickname.as_deref());
        w.write_i8(self.team);
        w.write_optional_vector3(self.position);
        w.write_optional_vector3(self.orientation);
        w.write_i32(self.health);
        w.write_u16(self.incarnation);
    }
}

#[derive(Debug, Clone)]
pub struct SetHealth {
    pub nickname: Option<String>,
    pub health: i32,
}

impl ServerPacket for SetHealth {
    const ID: i32 = -611_961_116;
    const NAME: &'static str = "SetHealth";

    fn write(&self, w: &mut BufferWriter) {
        w.write_optional_string(self.nickname.as_deref());
        w.write_i32(self.health);
    }
}

/// Client finished loading after placement and is ready to take damage
#[derive(Debug, Clone, Default)]
pub struct ReadyToActivate;

impl ClientPacket for ReadyToActivate {
    const ID: i32 = 1_866_985_203;
    const NAME: &'static str = "ReadyToActivate";

    fn read(_r: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        Ok(Self)
    }
}

#[derive(Debug, Clone)]
pub struct ActivateTank {
    pub nickname: Option<String>,
}

impl ServerPacket for ActivateTank {
    const ID: i32 = -1_864_882_174;
    const NAME: &'static str = "ActivateTank";

    fn write(&self, w: &mut BufferWriter) {
        w.write_optional_string(self.nickname.as_deref());
    }
}

/// A tank re-entered with different equipment; peers must rebuild its model
#[derive(Debug, Clone)]
pub struct EquipmentChanged {
    pub nickname: Option<String>,
}

impl ServerPacket for EquipmentChanged {
    const ID: i32 = -1_767_633_906;
    const NAME: &'static str = "EquipmentChanged";

    fn write(&self, w: &mut BufferWriter) {
        w.write_optional_string(self.nickname.as_deref());
    }
}

// ---------------------------------------------------------------------------
// Movement
// ---------------------------------------------------------------------------

/// Hull movement update from a client
#[derive(Debug, Clone)]
pub struct MoveCommand {
    pub client_time: i32,
    pub position: Option<Vector3>,
    pub orientation: Option<Vector3>,
    pub linear_velocity: Option<Vector3>,
    pub angular_velocity: Option<Vector3>,
    pub control: i8,
}

impl ClientPacket for MoveCommand {
    const ID: i32 = 329_279_865;
    const NAME: &'static str = "MoveCommand";

    fn read(r: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            client_time: r.read_i32()?,
            position: r.read_optional_vector3()?,
            orientation: r.read_optional_vector3()?,
            linear_velocity: r.read_optional_vector3()?,
            angular_velocity: r.read_optional_vector3()?,
            control: r.read_i8()?,
        })
    }
}

/// Hull movement relayed to the other participants
#[derive(Debug, Clone)]
pub struct MovePacket {
    pub nickname: Option<String>,
    pub position: Option<Vector3>,
    pub orientation: Option<Vector3>,
    pub linear_velocity: Option<Vector3>,
    pub angular_velocity: Option<Vector3>,
    pub control: i8,
}

impl ServerPacket for MovePacket {
    const ID: i32 = -64_696_933;
    const NAME: &'static str = "MovePacket";

    fn write(&self, w: &mut BufferWriter) {
        w.write_optional_string(self.nickname.as_deref());
        w.write_optional_vector3(self.position);
        w.write_optional_vector3(self.orientation);
        w.write_optional_vector3(self.linear_velocity);
        w.write_optional_vector3(self.angular_velocity);
        w.write_i8(self.control);
    }
}

/// Hull + turret movement in a single frame
#[derive(Debug, Clone)]
pub struct FullMoveCommand {
    pub body: MoveCommand,
    pub turret_direction: f32,
}

impl ClientPacket for FullMoveCommand {
    const ID: i32 = -1_683_279_062;
    const NAME: &'static str = "FullMoveCommand";

    fn read(r: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            body: MoveCommand::read(r)?,
            turret_direction: r.read_f32()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct FullMovePacket {
    pub body: MovePacket,
    pub turret_direction: f32,
}

impl ServerPacket for FullMovePacket {
    const ID: i32 = 13_775_774;
    const NAME: &'static str = "FullMovePacket";

    fn write(&self, w: &mut BufferWriter) {
        self.body.write(w);
        w.write_f32(self.turret_direction);
    }
}

#[derive(Debug, Clone)]
pub struct RotateTurretCommand {
    pub client_time: i32,
    pub angle: f32,
    pub control: i8,
}

impl ClientPacket for RotateTurretCommand {
    const ID: i32 = -114_968_993;
    const NAME: &'static str = "RotateTurretCommand";

    fn read(r: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            client_time: r.read_i32()?,
            angle: r.read_f32()?,
            control: r.read_i8()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct TurretRotation {
    pub nickname: Option<String>,
    pub angle: f32,
    pub control: i8,
}

impl ServerPacket for TurretRotation {
    const ID: i32 = 1_927_704_181;
    const NAME: &'static str = "TurretRotation";

    fn write(&self, w: &mut BufferWriter) {
        w.write_optional_string(self.nickname.as_deref());
        w.write_f32(self.angle);
        w.write_i8(self.control);
    }
}

// ---------------------------------------------------------------------------
// Destruction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct SelfDestruct;

impl ClientPacket for SelfDestruct {
    const ID: i32 = -911_983_090;
    const NAME: &'static str = "SelfDestruct";

    fn read(_r: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        Ok(Self)
    }
}

#[derive(Debug, Clone)]
pub struct DestroyTank {
    pub nickname: Option<String>,
    pub respawn_delay_ms: i32,
}

impl ServerPacket for DestroyTank {
    const ID: i32 = -42_520_728;
    const NAME: &'static str = "DestroyTank";

    fn write(&self, w: &mut BufferWriter) {
        w.write_optional_string(self.nickname.as_deref());
        w.write_i32(self.respawn_delay_ms);
    }
}

// ---------------------------------------------------------------------------
// Flags (CTF)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct DropFlagRequest;

impl ClientPacket for DropFlagRequest {
    const ID: i32 = -1_122_390_039;
    const NAME: &'static str = "DropFlagRequest";

    fn read(_r: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        Ok(Self)
    }
}

#[derive(Debug, Clone)]
pub struct FlagTaken {
    /// Flag color: 0 = red flag, 1 = blue flag
    pub team: i8,
    pub carrier: Option<String>,
}

impl ServerPacket for FlagTaken {
    const ID: i32 = -1_911_784_846;
    const NAME: &'static str = "FlagTaken";

    fn write(&self, w: &mut BufferWriter) {
        w.write_i8(self.team);
        w.write_optional_string(self.carrier.as_deref());
    }
}

#[derive(Debug, Clone)]
pub struct FlagDropped {
    pub team: i8,
    pub position: Option<Vector3>,
}

impl ServerPacket for FlagDropped {
    const ID: i32 = -1_282_406_496;
    const NAME: &'static str = "FlagDropped";

    fn write(&self, w: &mut BufferWriter) {
        w.write_i8(self.team);
        w.write_optional_vector3(self.position);
    }
}

#[derive(Debug, Clone)]
pub struct FlagReturned {
    pub team: i8,
}

impl ServerPacket for FlagReturned {
    const ID: i32 = 1_448_541_124;
    const NAME: &'static str = "FlagReturned";

    fn write(&self, w: &mut BufferWriter) {
        w.write_i8(self.team);
    }
}

#[derive(Debug, Clone)]
pub struct FlagCaptured {
    pub team: i8,
    pub carrier: Option<String>,
    pub score_blue: i32,
    pub score_red: i32,
}

impl ServerPacket for FlagCaptured {
    const ID: i32 = -1_870_108_374;
    const NAME: &'static str = "FlagCaptured";

    fn write(&self, w: &mut BufferWriter) {
        w.write_i8(self.team);
        w.write_optional_string(self.carrier.as_deref());
        w.write_i32(self.score_blue);
        w.write_i32(self.score_red);
    }
}

// ---------------------------------------------------------------------------
// Capture points (domination)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CapturePointUpdate {
    pub point_id: i32,
    /// 0 = red owned, 1 = blue owned, 2 = neutral
    pub state: i8,
    pub score: f32,
}

impl ServerPacket for CapturePointUpdate {
    const ID: i32 = 556_409_622;
    const NAME: &'static str = "CapturePointUpdate";

    fn write(&self, w: &mut BufferWriter) {
        w.write_i32(self.point_id);
        w.write_i8(self.state);
        w.write_f32(self.score);
    }
}

// ---------------------------------------------------------------------------
// Weapons
// ---------------------------------------------------------------------------

/// One tank the shooter claims to have hit
#[derive(Debug, Clone, PartialEq)]
pub struct ShotTarget {
    pub nickname: String,
    pub position: Option<Vector3>,
    pub incarnation: i16,
    pub rotation: Option<Vector3>,
    pub orientation: Option<Vector3>,
}

/// Railgun discharge with its hit list. Targets travel as parallel arrays
/// keyed by the nickname list.
#[derive(Debug, Clone)]
pub struct RailgunShotCommand {
    pub client_time: i32,
    pub position: Option<Vector3>,
    pub targets: Vec<ShotTarget>,
}

impl ClientPacket for RailgunShotCommand {
    const ID: i32 = -484_994_657;
    const NAME: &'static str = "RailgunShotCommand";

    fn read(r: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        let client_time = r.read_i32()?;
        let position = r.read_optional_vector3()?;
        let nicknames = r.read_string_array()?;
        let positions = r.read_vector3_array()?;
        let incarnations = r.read_i16_array()?;
        let rotations = r.read_vector3_array()?;
        let orientations = r.read_vector3_array()?;

        // The nickname list drives the target count; a shorter parallel
        // array yields an absent field, not a decode error.
        let targets = nicknames
            .into_iter()
            .enumerate()
            .map(|(i, nickname)| ShotTarget {
                nickname,
                position: positions.get(i).copied().flatten(),
                incarnation: incarnations.get(i).copied().unwrap_or(0),
                rotation: rotations.get(i).copied().flatten(),
                orientation: orientations.get(i).copied().flatten(),
            })
            .collect();

        Ok(Self {
            client_time,
            position,
            targets,
        })
    }
}

/// Railgun discharge relayed to the other participants
#[derive(Debug, Clone)]
pub struct RailgunShot {
    pub nickname: Option<String>,
    pub position: Option<Vector3>,
    pub targets: Vec<ShotTarget>,
}

impl ServerPacket for RailgunShot {
    const ID: i32 = -1_847_845_602;
    const NAME: &'static str = "RailgunShot";

    fn write(&self, w: &mut BufferWriter) {
        w.write_optional_string(self.nickname.as_deref());
        w.write_optional_vector3(self.position);

        let nicknames: Vec<String> =
            self.targets.iter().map(|t| t.nickname.clone()).collect();
        w.write_string_array(&nicknames);
        let positions: Vec<Option<Vector3>> = self.targets.iter().map(|t| t.position).collect();
        w.write_vector3_array(&positions);
        let incarnations: Vec<i16> = self.targets.iter().map(|t| t.incarnation).collect();
        w.write_i16_array(&incarnations);
        let rotations: Vec<Option<Vector3>> = self.targets.iter().map(|t| t.rotation).collect();
        w.write_vector3_array(&rotations);
        let orientations: Vec<Option<Vector3>> =
            self.targets.iter().map(|t| t.orientation).collect();
        w.write_vector3_array(&orientations);
    }
}

// ---------------------------------------------------------------------------
// Battle chat
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BattleChatRequest {
    pub message: Option<String>,
    pub team_only: bool,
}

impl ClientPacket for BattleChatRequest {
    const ID: i32 = 945_463_181;
    const NAME: &'static str = "BattleChatRequest";

    fn read(r: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            message: r.read_optional_string()?,
            team_only: r.read_u8()? != 0,
        })
    }
}

#[derive(Debug, Clone)]
pub struct BattleChatMessage {
    pub nickname: Option<String>,
    pub message: Option<String>,
    /// Sender team: 0 = red, 1 = blue, 2 = none
    pub team: i8,
    pub team_only: bool,
}

impl ServerPacket for BattleChatMessage {
    const ID: i32 = 1_259_981_343;
    const NAME: &'static str = "BattleChatMessage";

    fn write(&self, w: &mut BufferWriter) {
        w.write_optional_string(self.nickname.as_deref());
        w.write_optional_string(self.message.as_deref());
        w.write_i8(self.team);
        w.write_u8(self.team_only as u8);
    }
}
