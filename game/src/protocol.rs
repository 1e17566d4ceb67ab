use std::convert::From;

use serde::{Deserialize, Serialize};

use crate::model::{Card, CardId, GameState, PlayerId, RoomCode};
use crate::rules::PlayRejection;

/// Every possible kind of request that a client may send.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub enum Request {
    Lobby(LobbyRequest),
    Game(GameRequest),
}

/// Every possible kind of response that the host may send.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub enum Response {
    /// The request made no sense for the connection's protocol phase.
    Illegal,
    Lobby(LobbyResponse),
    /// Authoritative full snapshot; replaces the client's public state
    /// wholesale.
    State(GameState),
    /// Full replacement of the receiving client's private hand, sent at each
    /// deal.
    PrivateHand(Vec<Card>),
    /// Private hand delta after a play this client made.
    PlayResult(PlayResult),
    /// The play was refused; carries the validator's reason.
    Rejected(PlayRejection),
    /// Join-time rejection notice, e.g. joining a game already underway.
    Error(String),
}

// Auxillary macro for converting inner request/response types into their
// outermost counterparts.

macro_rules! derive_from {
    ($to:ident, $ty:ident, $r:ident) => {
        impl From<$r> for $to {
            fn from(r: $r) -> Self {
                $to::$ty(r)
            }
        }
    };
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub enum LobbyRequest {
    /// Create a new room and have the requester seated as its host.
    CreateRoom(CreateRoomRequest),
    JoinRoom(JoinRoomRequest),
}

derive_from!(Request, Lobby, LobbyRequest);

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CreateRoomRequest {
    /// The display name the creator plays under.
    pub name: String,
}

derive_from!(LobbyRequest, CreateRoom, CreateRoomRequest);

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct JoinRoomRequest {
    pub room_code: RoomCode,
    pub name: String,
}

derive_from!(LobbyRequest, JoinRoom, JoinRoomRequest);

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub enum LobbyResponse {
    RoomCreated(RoomCreatedResponse),
    RoomJoined(RoomJoinedResponse),
}

derive_from!(Response, Lobby, LobbyResponse);

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RoomCreatedResponse {
    pub room_code: RoomCode,
    /// The transport identity the creator plays under.
    pub player_id: PlayerId,
}

derive_from!(LobbyResponse, RoomCreated, RoomCreatedResponse);

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RoomJoinedResponse {
    pub player_id: PlayerId,
}

derive_from!(LobbyResponse, RoomJoined, RoomJoinedResponse);

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub enum GameRequest {
    /// Host-only: deal the first round and leave the lobby.
    Start,
    Play(PlayRequest),
    Pass,
    /// Host-only: redeal after a round has ended.
    NextRound,
}

derive_from!(Request, Game, GameRequest);

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PlayRequest {
    pub cards: Vec<Card>,
    /// Required when the covered top set is non-empty and the play does not
    /// empty the hand.
    pub pick_up_card_id: Option<CardId>,
}

derive_from!(GameRequest, Play, PlayRequest);

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PlayResult {
    pub played_card_ids: Vec<CardId>,
    pub pick_up_card: Option<Card>,
}

derive_from!(Response, PlayResult, PlayResult);
derive_from!(Response, State, GameState);
derive_from!(Response, Rejected, PlayRejection);

// Two-level shortcuts, so leaf payloads convert straight to the outermost
// envelope.

impl From<CreateRoomRequest> for Request {
    fn from(r: CreateRoomRequest) -> Self {
        Request::Lobby(LobbyRequest::CreateRoom(r))
    }
}

impl From<JoinRoomRequest> for Request {
    fn from(r: JoinRoomRequest) -> Self {
        Request::Lobby(LobbyRequest::JoinRoom(r))
    }
}

impl From<PlayRequest> for Request {
    fn from(r: PlayRequest) -> Self {
        Request::Game(GameRequest::Play(r))
    }
}

impl From<RoomCreatedResponse> for Response {
    fn from(r: RoomCreatedResponse) -> Self {
        Response::Lobby(LobbyResponse::RoomCreated(r))
    }
}

impl From<RoomJoinedResponse> for Response {
    fn from(r: RoomJoinedResponse) -> Self {
        Response::Lobby(LobbyResponse::RoomJoined(r))
    }
}
