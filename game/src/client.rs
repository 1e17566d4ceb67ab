//! The client side of the synchronization engine.
//!
//! A `ClientGame` is a passive mirror: it never mutates public state on its
//! own authority, it only folds in what the host pushes. Local actions
//! become `Request` values for the surrounding layer to put on the wire,
//! validated here first so a well-behaved peer rarely sends a rejectable
//! play.

use log::{debug, warn};

use crate::model::{Card, CardId, GameState, Phase, PlayerId, RoomCode};
use crate::protocol::{
    CreateRoomRequest, GameRequest, JoinRoomRequest, LobbyResponse, PlayRequest, Request, Response,
};
use crate::rules::{self, PlayRejection};

/// A participant's local view: the last authoritative snapshot, this peer's
/// private hand, and the identity the host assigned at seating.
#[derive(Debug, Default)]
pub struct ClientGame {
    player_id: Option<PlayerId>,
    state: Option<GameState>,
    hand: Vec<Card>,
}

impl ClientGame {
    pub fn new() -> Self {
        Self::default()
    }

    // Intent builders: the command surface a rendering layer drives.

    pub fn create_game(name: &str) -> Request {
        CreateRoomRequest { name: name.into() }.into()
    }

    pub fn join_game(room_code: RoomCode, name: &str) -> Request {
        JoinRoomRequest {
            room_code,
            name: name.into(),
        }
        .into()
    }

    pub fn start_game(&self) -> Request {
        Request::Game(GameRequest::Start)
    }

    pub fn pass_turn(&self) -> Request {
        Request::Game(GameRequest::Pass)
    }

    pub fn next_round(&self) -> Request {
        Request::Game(GameRequest::NextRound)
    }

    /// Build a PLAY intent, validated against the local view so an illegal
    /// play never leaves this peer. The host re-validates regardless; its
    /// verdict is the one that counts.
    pub fn play_cards(
        &self,
        mut cards: Vec<Card>,
        pick_up_card_id: Option<CardId>,
    ) -> Result<Request, PlayRejection> {
        cards.sort_by(|a, b| b.value.cmp(&a.value));
        let top = self.top_center_cards();
        rules::validate_play(&cards, top, Some(self.hand.len()))?;
        // Continuing over a covered set owes a pick-up; emptying the hand
        // does not.
        let empties_hand = cards.len() == self.hand.len();
        if !top.is_empty() && !empties_hand && pick_up_card_id.is_none() {
            return Err(PlayRejection::PickUpRequired);
        }
        Ok(PlayRequest {
            cards,
            pick_up_card_id,
        }
        .into())
    }

    /// Fold one host push into the local view.
    ///
    /// Snapshots replace the public state wholesale, so receiving the same
    /// broadcast twice is harmless.
    pub fn apply(&mut self, response: &Response) {
        match response {
            Response::State(state) => {
                self.state = Some(state.clone());
            }
            Response::PrivateHand(cards) => {
                self.hand = cards.clone();
            }
            Response::PlayResult(result) => {
                self.hand
                    .retain(|c| !result.played_card_ids.contains(&c.id));
                if let Some(card) = &result.pick_up_card {
                    self.hand.push(card.clone());
                }
            }
            Response::Lobby(LobbyResponse::RoomCreated(created)) => {
                self.player_id = Some(created.player_id);
            }
            Response::Lobby(LobbyResponse::RoomJoined(joined)) => {
                self.player_id = Some(joined.player_id);
            }
            Response::Rejected(rejection) => {
                warn!("play rejected by the host: {}", rejection);
            }
            Response::Error(message) => {
                warn!("host refused the request: {}", message);
            }
            Response::Illegal => {
                debug!("request was illegal for the connection's phase");
            }
        }
    }

    // Read projections.

    pub fn player_id(&self) -> Option<PlayerId> {
        self.player_id
    }

    pub fn state(&self) -> Option<&GameState> {
        self.state.as_ref()
    }

    pub fn phase(&self) -> Option<Phase> {
        self.state.as_ref().map(|s| s.phase)
    }

    pub fn room_code(&self) -> Option<RoomCode> {
        self.state.as_ref().map(|s| s.room_code)
    }

    pub fn my_hand(&self) -> &[Card] {
        &self.hand
    }

    pub fn top_center_cards(&self) -> &[Card] {
        self.state
            .as_ref()
            .map(|s| s.top_center_cards())
            .unwrap_or(&[])
    }

    pub fn my_turn(&self) -> bool {
        match (&self.state, self.player_id) {
            (Some(state), Some(id)) => state.is_current(id),
            _ => false,
        }
    }

    pub fn is_host(&self) -> bool {
        match (&self.state, self.player_id) {
            (Some(state), Some(id)) => state.host_id == id,
            _ => false,
        }
    }
}
