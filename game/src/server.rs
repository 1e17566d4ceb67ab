/// The host side of the synchronization engine.
///
/// A `Core` owns the room registry for one hosting process. Each peer
/// connection drives a `Context`, which walks the connection's protocol
/// phase and executes requests against the room the peer is seated in. A
/// room's state lives behind a single async mutex: every intent runs
/// validate -> mutate -> broadcast to completion before the next one is
/// admitted, so the engine is single-writer by construction.
use std::collections::BTreeMap;
use std::default::Default;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::channel::mpsc;
use futures::lock::Mutex;
use futures::SinkExt;
use log::{debug, error, warn};
use rand::Rng;
use serde::Deserialize;
use snafu::Snafu;

use crate::model::{Card, GameState, Phase as GamePhase, Player, PlayerId, RoomCode};
use crate::protocol::{
    GameRequest, LobbyRequest, PlayRequest, PlayResult, Request, Response, RoomCreatedResponse,
    RoomJoinedResponse,
};
use crate::rules::{self, PlayRejection};
use Phase::*;

pub struct Core {
    settings: Settings,
    next_player_id: AtomicU64,
    rooms: Mutex<Rooms>,
}

#[derive(Copy, Clone, Debug, Deserialize)]
pub struct Settings {
    pub max_players_cap: u8,
    pub score_limit: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_players_cap: 6,
            score_limit: 15,
        }
    }
}

// Bounded retry for 4-digit code collisions before giving up.
const ROOM_CODE_ATTEMPTS: usize = 3;

impl Core {
    /// Create a new, empty core.
    pub fn new(settings: Settings) -> Self {
        Core {
            settings,
            next_player_id: AtomicU64::new(1),
            rooms: Mutex::new(Rooms::new()),
        }
    }

    /// Register a new peer connection with the core.
    ///
    /// The response channel should have a consumer that somehow delivers the
    /// responses to the peer. In the actual server, this involves
    /// serializing and writing the response to a WebSocket; in a test, the
    /// test holds the receiving end.
    ///
    /// The returned context provides the connection task the means to
    /// execute incoming requests.
    pub async fn register(&self, response_tx: mpsc::Sender<Response>) -> Context<'_> {
        Context::new(self, response_tx)
    }

    fn mint_player_id(&self) -> PlayerId {
        PlayerId(self.next_player_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn create_room(&self, host_id: PlayerId) -> Result<(RoomCode, Synced<Room>), LobbyError> {
        let mut rooms = self.rooms.lock().await;
        for _ in 0..ROOM_CODE_ATTEMPTS {
            let code = RoomCode(rand::thread_rng().gen_range(1000, 10_000));
            if let Some(existing) = rooms.lookup(code).cloned() {
                // A dead room may still squat on the code; reclaim it.
                if !existing.lock().await.abandoned() {
                    continue;
                }
            }
            let room = make_synced(Room::new(code, self.settings, host_id));
            rooms.insert(code, room.clone());
            return Ok((code, room));
        }
        Err(LobbyError::NoFreeRoomCode)
    }

    async fn lookup_room(&self, code: RoomCode) -> Option<Synced<Room>> {
        self.rooms.lock().await.lookup(code).cloned()
    }
}

#[derive(Debug, Snafu)]
pub enum LobbyError {
    #[snafu(display("could not find a free room code"))]
    NoFreeRoomCode,
    #[snafu(display("room {} not found", code))]
    RoomNotFound { code: RoomCode },
    #[snafu(display("game already started"))]
    GameAlreadyStarted,
    #[snafu(display("room is full"))]
    RoomFull,
}

/// The handle by which connection tasks execute requests against the core.
pub struct Context<'core> {
    core: &'core Core,
    response_tx: mpsc::Sender<Response>,
    phase: Phase,
}

impl<'core> Context<'core> {
    fn new(core: &'core Core, response_tx: mpsc::Sender<Response>) -> Self {
        Context {
            core,
            response_tx,
            phase: Outside,
        }
    }

    /// Execute a single request to completion.
    ///
    /// Direct replies go to this connection's response channel; state
    /// broadcasts triggered by the request go to every channel seated in the
    /// room.
    pub async fn execute(&mut self, req: Request) {
        let phase = std::mem::replace(&mut self.phase, Outside);
        let (phase, response) = phase.handle(self, req).await;
        self.phase = phase;
        if let Some(response) = response {
            self.send(response).await;
        }
    }

    /// Cleanup when the peer goes away. Seats are never vacated (seat order
    /// is fixed for the life of the room); only the outbound channel is
    /// dropped.
    pub async fn cleanup(&mut self) {
        if let Seated { player_id, room } = &self.phase {
            room.lock().await.disconnect(*player_id);
        }
    }

    async fn send(&mut self, r: Response) {
        self.response_tx
            .send(r)
            .await
            .map_err(|e| error!("while sending response: {}", e))
            .ok();
    }
}

// Represents the protocol phase of a peer connection.
enum Phase {
    // Connected but not seated anywhere. Only lobby requests make sense.
    Outside,
    // Seated in a room, from its lobby through the end of its game.
    Seated {
        player_id: PlayerId,
        room: Synced<Room>,
    },
}

impl Phase {
    // Main request dispatch.
    async fn handle<'core>(
        self,
        ctx: &mut Context<'core>,
        req: Request,
    ) -> (Self, Option<Response>) {
        match self {
            Outside => match req {
                Request::Lobby(LobbyRequest::CreateRoom(create)) => {
                    let player_id = ctx.core.mint_player_id();
                    match ctx.core.create_room(player_id).await {
                        Ok((room_code, room)) => {
                            {
                                let mut locked = room.lock().await;
                                locked.seat(player_id, create.name, true, ctx.response_tx.clone());
                                locked.broadcast_state().await;
                            }
                            (
                                Seated { player_id, room },
                                Some(RoomCreatedResponse {
                                    room_code,
                                    player_id,
                                }
                                .into()),
                            )
                        }
                        Err(e) => (Outside, Some(Response::Error(e.to_string()))),
                    }
                }
                Request::Lobby(LobbyRequest::JoinRoom(join)) => {
                    let room = match ctx.core.lookup_room(join.room_code).await {
                        Some(room) => room,
                        None => {
                            let e = LobbyError::RoomNotFound {
                                code: join.room_code,
                            };
                            return (Outside, Some(Response::Error(e.to_string())));
                        }
                    };
                    let player_id = ctx.core.mint_player_id();
                    let admitted = {
                        let mut locked = room.lock().await;
                        match locked.join(player_id, join.name, ctx.response_tx.clone()) {
                            Ok(()) => {
                                locked.broadcast_state().await;
                                Ok(())
                            }
                            Err(e) => Err(e),
                        }
                    };
                    match admitted {
                        Ok(()) => (
                            Seated { player_id, room },
                            Some(RoomJoinedResponse { player_id }.into()),
                        ),
                        Err(e) => (Outside, Some(Response::Error(e.to_string()))),
                    }
                }
                Request::Game(_) => (Outside, Some(Response::Illegal)),
            },
            Seated { player_id, room } => {
                let response = match req {
                    Request::Game(game_req) => {
                        let mut locked = room.lock().await;
                        match game_req {
                            GameRequest::Start => {
                                locked.start(player_id).await;
                                None
                            }
                            GameRequest::Play(play) => locked
                                .handle_play(player_id, play)
                                .await
                                .err()
                                .map(Response::Rejected),
                            GameRequest::Pass => {
                                locked.handle_pass(player_id).await;
                                None
                            }
                            GameRequest::NextRound => {
                                locked.next_round(player_id).await;
                                None
                            }
                        }
                    }
                    Request::Lobby(_) => Some(Response::Illegal),
                };
                (Seated { player_id, room }, response)
            }
        }
    }
}

// The set of rooms open on this hosting process.
struct Rooms {
    rooms: BTreeMap<RoomCode, Synced<Room>>,
}

impl Rooms {
    fn new() -> Self {
        Rooms {
            rooms: BTreeMap::new(),
        }
    }

    fn insert(&mut self, code: RoomCode, room: Synced<Room>) {
        self.rooms.insert(code, room);
    }

    fn lookup(&self, code: RoomCode) -> Option<&Synced<Room>> {
        self.rooms.get(&code)
    }
}

/// One room: the only writable copy of its `GameState`, plus the outbound
/// channel of every seat.
pub struct Room {
    settings: Settings,
    state: GameState,
    members: Vec<Member>,
}

impl Room {
    fn new(code: RoomCode, settings: Settings, host_id: PlayerId) -> Self {
        Room {
            settings,
            state: GameState::new(code, host_id),
            members: Vec::new(),
        }
    }

    /// Seat a player at the end of the seat order. The caller has already
    /// decided admission.
    fn seat(
        &mut self,
        player_id: PlayerId,
        name: String,
        is_host: bool,
        response_tx: mpsc::Sender<Response>,
    ) {
        self.state.add_player(Player {
            id: player_id,
            name,
            is_host,
            hand_count: 0,
            score: 0,
        });
        self.members.push(Member {
            player_id,
            response_tx: Some(response_tx),
        });
    }

    /// Admission control for joiners: lobby phase only, bounded by the
    /// player cap.
    fn join(
        &mut self,
        player_id: PlayerId,
        name: String,
        response_tx: mpsc::Sender<Response>,
    ) -> Result<(), LobbyError> {
        if self.state.phase != GamePhase::Lobby {
            return Err(LobbyError::GameAlreadyStarted);
        }
        // A 54-card deck deals at most six 9-card hands, whatever the cap
        // says.
        let seats = (rules::DECK_SIZE / rules::HAND_SIZE).min(self.settings.max_players_cap as usize);
        if self.state.players.len() >= seats {
            return Err(LobbyError::RoomFull);
        }
        self.seat(player_id, name, false, response_tx);
        Ok(())
    }

    fn disconnect(&mut self, player_id: PlayerId) {
        debug!(
            "peer {:?} disconnected from room {}",
            player_id, self.state.room_code
        );
        if let Some(m) = self.members.iter_mut().find(|m| m.player_id == player_id) {
            m.response_tx = None;
        }
    }

    /// A room every seat of which has gone away. Its code may be reclaimed.
    fn abandoned(&self) -> bool {
        !self.members.is_empty() && self.members.iter().all(|m| m.response_tx.is_none())
    }

    /// Host-only: leave the lobby and deal the first round. Seat 0 opens,
    /// and is recorded as this round's first player for the rotation rule.
    async fn start(&mut self, actor: PlayerId) {
        if actor != self.state.host_id {
            debug!("ignoring start from non-host {:?}", actor);
            return;
        }
        if self.state.phase != GamePhase::Lobby {
            debug!("ignoring start outside the lobby");
            return;
        }
        if self.state.players.len() < 2 {
            debug!("ignoring start with fewer than two players");
            return;
        }
        self.deal().await;
        let first = self.state.players[0].id;
        self.state.current_player_id = Some(first);
        self.state.last_round_first_player_id = Some(first);
        self.state.phase = GamePhase::Playing;
        self.broadcast_state().await;
    }

    /// Resolve a PLAY intent.
    ///
    /// `Err` is the typed rejection sent back to the actor. Out-of-turn,
    /// wrong-phase, and oversized intents are dropped with a diagnostic and
    /// no reply, matching how passes are handled.
    async fn handle_play(
        &mut self,
        actor: PlayerId,
        play: PlayRequest,
    ) -> Result<(), PlayRejection> {
        if self.state.phase != GamePhase::Playing || !self.state.is_current(actor) {
            debug!("dropping play from {:?}: not their turn", actor);
            return Ok(());
        }

        let PlayRequest {
            mut cards,
            pick_up_card_id,
        } = play;
        // Played sets are kept in descending value order everywhere.
        cards.sort_by(|a, b| b.value.cmp(&a.value));

        let top = self.state.top_center_cards().to_vec();
        rules::validate_play(&cards, &top, None)?;

        let hand_count = match self.state.player(actor) {
            Some(p) => p.hand_count,
            None => {
                debug!("dropping play from unseated {:?}", actor);
                return Ok(());
            }
        };
        let new_count = match hand_count.checked_sub(cards.len()) {
            Some(n) => n,
            None => {
                warn!("dropping play from {:?}: more cards than the hand holds", actor);
                return Ok(());
            }
        };

        if new_count == 0 {
            // Emptying the hand ends the round on the spot. The set still
            // lands on the stack for everyone to see, and no pick-up is
            // owed even over a non-empty top set.
            if let Some(p) = self.state.player_mut(actor) {
                p.hand_count = 0;
            }
            self.state.center_stack.push(cards);
            self.state.consecutive_passes = 0;
            self.broadcast_state().await;
            self.end_round().await;
            return Ok(());
        }

        // Continuing with cards in hand: covering a non-empty top set owes
        // the player exactly one card picked up from it.
        let pick_up_card = if top.is_empty() {
            None
        } else {
            let id = pick_up_card_id.ok_or(PlayRejection::PickUpRequired)?;
            let card = top
                .iter()
                .find(|c| c.id == id)
                .cloned()
                .ok_or(PlayRejection::PickUpNotInTopSet)?;
            Some(card)
        };

        let picked_up = if pick_up_card.is_some() { 1 } else { 0 };
        if let Some(p) = self.state.player_mut(actor) {
            p.hand_count = new_count + picked_up;
        }

        let played_card_ids = cards.iter().map(|c| c.id.clone()).collect();
        self.state.center_stack.push(cards);
        self.state.current_player_id = self.state.next_player_after(actor);
        self.state.consecutive_passes = 0;

        self.send_to(
            actor,
            Response::PlayResult(PlayResult {
                played_card_ids,
                pick_up_card,
            }),
        )
        .await;
        self.broadcast_state().await;
        Ok(())
    }

    /// Resolve a PASS intent. A full pass-around resets the trick (stack
    /// cleared, counter zeroed) without leaving the playing phase; the turn
    /// advances either way.
    async fn handle_pass(&mut self, actor: PlayerId) {
        if self.state.phase != GamePhase::Playing || !self.state.is_current(actor) {
            debug!("dropping pass from {:?}: not their turn", actor);
            return;
        }
        let next = self.state.next_player_after(actor);
        self.state.consecutive_passes += 1;
        if self.state.consecutive_passes >= self.state.players.len() - 1 {
            self.state.consecutive_passes = 0;
            self.state.center_stack.clear();
        }
        self.state.current_player_id = next;
        self.broadcast_state().await;
    }

    /// Host-only: redeal after a round has ended. The starting seat rotates
    /// to the one after whoever opened the previous round.
    async fn next_round(&mut self, actor: PlayerId) {
        if actor != self.state.host_id {
            debug!("ignoring next-round from non-host {:?}", actor);
            return;
        }
        match self.state.phase {
            GamePhase::RoundEnd | GamePhase::GameEnd => {}
            _ => {
                debug!("ignoring next-round while no round has ended");
                return;
            }
        }
        let prev_first = match self
            .state
            .last_round_first_player_id
            .or_else(|| self.state.players.first().map(|p| p.id))
        {
            Some(id) => id,
            None => return,
        };
        self.deal().await;
        let next_first = self.state.next_player_after(prev_first).unwrap_or(prev_first);
        self.state.current_player_id = Some(next_first);
        self.state.last_round_first_player_id = Some(next_first);
        self.state.winner_id = None;
        self.state.phase = GamePhase::Playing;
        self.broadcast_state().await;
    }

    /// Score the finished round and decide whether the game is over.
    async fn end_round(&mut self) {
        for p in self.state.players.iter_mut() {
            p.score += p.hand_count as u32;
        }
        let game_over = self
            .state
            .players
            .iter()
            .any(|p| p.score >= self.settings.score_limit);
        if game_over {
            self.state.winner_id = self.state.lowest_scorer();
            self.state.phase = GamePhase::GameEnd;
        } else {
            self.state.phase = GamePhase::RoundEnd;
        }
        self.broadcast_state().await;
    }

    /// Deal a fresh shuffled deck, 9 cards per seat. Hands are delivered on
    /// each seat's private channel and immediately forgotten here; only the
    /// counts stay. The undealt remainder is tracked as a bare count.
    async fn deal(&mut self) {
        let mut deck = rules::create_deck(&mut rand::thread_rng());
        let hands: Vec<(PlayerId, Vec<Card>)> = self
            .state
            .players
            .iter()
            .map(|p| (p.id, deck.drain(..rules::HAND_SIZE).collect()))
            .collect();
        for p in self.state.players.iter_mut() {
            p.hand_count = rules::HAND_SIZE;
        }
        self.state.deck_size = deck.len();
        self.state.center_stack.clear();
        self.state.consecutive_passes = 0;
        for (player_id, hand) in hands {
            self.send_to(player_id, Response::PrivateHand(hand)).await;
        }
    }

    /// Push the authoritative full snapshot to every connected seat.
    async fn broadcast_state(&mut self) {
        let snapshot = Response::State(self.state.clone());
        for m in self.members.iter_mut() {
            m.send(snapshot.clone()).await;
        }
    }

    async fn send_to(&mut self, player_id: PlayerId, r: Response) {
        if let Some(m) = self.members.iter_mut().find(|m| m.player_id == player_id) {
            m.send(r).await;
        }
    }
}

// A seat's link from the public player entry to its outbound channel.
struct Member {
    player_id: PlayerId,
    response_tx: Option<mpsc::Sender<Response>>,
}

impl Member {
    async fn send(&mut self, r: Response) {
        if let Some(tx) = self.response_tx.as_mut() {
            tx.send(r)
                .await
                .map_err(|e| error!("while sending to {:?}: {}", self.player_id, e))
                .ok();
        }
    }
}

type Synced<T> = Arc<Mutex<T>>;

fn make_synced<T>(t: T) -> Arc<Mutex<T>> {
    Arc::new(Mutex::new(t))
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;

    use super::*;
    use crate::model::{CardColor, CardId};

    const TEST_SETTINGS: Settings = Settings {
        max_players_cap: 6,
        score_limit: 15,
    };

    fn card(value: u8, color: CardColor, id: &str) -> Card {
        Card {
            id: CardId(id.into()),
            value,
            color,
        }
    }

    fn test_room(names: &[&str]) -> (Room, Vec<mpsc::Receiver<Response>>) {
        let mut room = Room::new(RoomCode(4321), TEST_SETTINGS, PlayerId(1));
        let mut rxs = Vec::new();
        for (i, name) in names.iter().enumerate() {
            let (tx, rx) = mpsc::channel(64);
            let id = PlayerId(i as u64 + 1);
            if i == 0 {
                room.seat(id, (*name).into(), true, tx);
            } else {
                room.join(id, (*name).into(), tx).expect("lobby join");
            }
            rxs.push(rx);
        }
        (room, rxs)
    }

    // Skip the random deal and put the room mid-round with known counts.
    fn force_playing(room: &mut Room) {
        for p in room.state.players.iter_mut() {
            p.hand_count = rules::HAND_SIZE;
        }
        room.state.deck_size =
            rules::DECK_SIZE - room.state.players.len() * rules::HAND_SIZE;
        room.state.phase = GamePhase::Playing;
        room.state.current_player_id = Some(PlayerId(1));
        room.state.last_round_first_player_id = Some(PlayerId(1));
    }

    fn drain(rx: &mut mpsc::Receiver<Response>) -> Vec<Response> {
        let mut out = Vec::new();
        while let Ok(Some(r)) = rx.try_next() {
            out.push(r);
        }
        out
    }

    fn dealt_cards(responses: &[Response]) -> Option<Vec<Card>> {
        responses.iter().find_map(|r| match r {
            Response::PrivateHand(cards) => Some(cards.clone()),
            _ => None,
        })
    }

    #[test]
    fn start_deals_nine_per_seat_and_conserves_cards() {
        let (mut room, mut rxs) = test_room(&["alice", "bob", "carol"]);
        block_on(room.start(PlayerId(1)));

        assert_eq!(room.state.phase, GamePhase::Playing);
        assert_eq!(room.state.current_player_id, Some(PlayerId(1)));
        assert_eq!(room.state.last_round_first_player_id, Some(PlayerId(1)));
        assert_eq!(room.state.deck_size, rules::DECK_SIZE - 3 * rules::HAND_SIZE);
        for p in &room.state.players {
            assert_eq!(p.hand_count, rules::HAND_SIZE);
        }

        let on_stack: usize = room.state.center_stack.iter().map(Vec::len).sum();
        let in_hands: usize = room.state.players.iter().map(|p| p.hand_count).sum();
        assert_eq!(in_hands + room.state.deck_size + on_stack, rules::DECK_SIZE);

        for rx in rxs.iter_mut() {
            let responses = drain(rx);
            let hand = dealt_cards(&responses).expect("a private hand");
            assert_eq!(hand.len(), rules::HAND_SIZE);
            assert!(responses
                .iter()
                .any(|r| matches!(r, Response::State(s) if s.phase == GamePhase::Playing)));
        }
    }

    #[test]
    fn start_requires_the_host_and_two_players() {
        let (mut room, _rxs) = test_room(&["alice", "bob"]);
        block_on(room.start(PlayerId(2)));
        assert_eq!(room.state.phase, GamePhase::Lobby);

        let (mut solo, _rx) = test_room(&["alice"]);
        block_on(solo.start(PlayerId(1)));
        assert_eq!(solo.state.phase, GamePhase::Lobby);
    }

    #[test]
    fn out_of_turn_play_is_dropped_without_state_change() {
        let (mut room, _rxs) = test_room(&["alice", "bob", "carol"]);
        force_playing(&mut room);
        let before = room.state.clone();

        let play = PlayRequest {
            cards: vec![card(5, CardColor::Red, "R-5-0")],
            pick_up_card_id: None,
        };
        assert_eq!(block_on(room.handle_play(PlayerId(2), play)), Ok(()));
        assert_eq!(room.state, before);
    }

    #[test]
    fn play_advances_turn_and_reports_the_private_delta() {
        let (mut room, mut rxs) = test_room(&["alice", "bob", "carol"]);
        force_playing(&mut room);

        let opener = card(5, CardColor::Red, "R-5-4");
        let play = PlayRequest {
            cards: vec![opener.clone()],
            pick_up_card_id: None,
        };
        assert_eq!(block_on(room.handle_play(PlayerId(1), play)), Ok(()));

        assert_eq!(room.state.top_center_cards(), &[opener.clone()][..]);
        assert_eq!(room.state.current_player_id, Some(PlayerId(2)));
        assert_eq!(room.state.consecutive_passes, 0);
        assert_eq!(room.state.player(PlayerId(1)).unwrap().hand_count, 8);

        let responses = drain(&mut rxs[0]);
        assert!(responses.iter().any(|r| matches!(
            r,
            Response::PlayResult(PlayResult { played_card_ids, pick_up_card: None })
                if played_card_ids == &vec![opener.id.clone()]
        )));
    }

    #[test]
    fn covering_a_set_requires_and_resolves_a_pick_up() {
        let (mut room, mut rxs) = test_room(&["alice", "bob", "carol"]);
        force_playing(&mut room);

        let opener = card(5, CardColor::Red, "R-5-4");
        block_on(room.handle_play(
            PlayerId(1),
            PlayRequest {
                cards: vec![opener.clone()],
                pick_up_card_id: None,
            },
        ))
        .unwrap();

        // Covering without naming a pick-up is refused and changes nothing.
        let before = room.state.clone();
        let cover = card(7, CardColor::Blue, "B-7-12");
        let refused = block_on(room.handle_play(
            PlayerId(2),
            PlayRequest {
                cards: vec![cover.clone()],
                pick_up_card_id: None,
            },
        ));
        assert_eq!(refused, Err(PlayRejection::PickUpRequired));
        assert_eq!(room.state, before);

        // Naming a card outside the covered set is just as bad.
        let refused = block_on(room.handle_play(
            PlayerId(2),
            PlayRequest {
                cards: vec![cover.clone()],
                pick_up_card_id: Some(CardId("G-1-20".into())),
            },
        ));
        assert_eq!(refused, Err(PlayRejection::PickUpNotInTopSet));
        assert_eq!(room.state, before);

        // With the opener picked up, the play lands: one out, one in.
        block_on(room.handle_play(
            PlayerId(2),
            PlayRequest {
                cards: vec![cover.clone()],
                pick_up_card_id: Some(opener.id.clone()),
            },
        ))
        .unwrap();
        assert_eq!(room.state.player(PlayerId(2)).unwrap().hand_count, 9);
        assert_eq!(room.state.current_player_id, Some(PlayerId(3)));
        assert_eq!(room.state.top_center_cards(), &[cover][..]);

        let responses = drain(&mut rxs[1]);
        assert!(responses.iter().any(|r| matches!(
            r,
            Response::PlayResult(PlayResult { pick_up_card: Some(c), .. }) if c.id == opener.id
        )));
    }

    #[test]
    fn emptying_play_ends_the_round_with_no_pick_up() {
        let (mut room, mut rxs) = test_room(&["alice", "bob", "carol"]);
        force_playing(&mut room);

        let opener = card(5, CardColor::Red, "R-5-4");
        block_on(room.handle_play(
            PlayerId(1),
            PlayRequest {
                cards: vec![opener],
                pick_up_card_id: None,
            },
        ))
        .unwrap();

        // Bob is down to his last card; playing it over a non-empty top set
        // ends the round with no pick-up owed.
        room.state.player_mut(PlayerId(2)).unwrap().hand_count = 1;
        let closer = card(9, CardColor::Blue, "B-9-12");
        block_on(room.handle_play(
            PlayerId(2),
            PlayRequest {
                cards: vec![closer.clone()],
                pick_up_card_id: None,
            },
        ))
        .unwrap();

        assert_eq!(room.state.phase, GamePhase::RoundEnd);
        assert_eq!(room.state.top_center_cards(), &[closer][..]);
        assert_eq!(room.state.consecutive_passes, 0);
        // The finisher scores nothing; the others eat their hands.
        assert_eq!(room.state.player(PlayerId(1)).unwrap().score, 8);
        assert_eq!(room.state.player(PlayerId(2)).unwrap().score, 0);
        assert_eq!(room.state.player(PlayerId(3)).unwrap().score, 9);
        assert_eq!(room.state.winner_id, None);

        // No private delta for the finisher: the hand is moot now.
        let responses = drain(&mut rxs[1]);
        assert!(!responses
            .iter()
            .any(|r| matches!(r, Response::PlayResult(_))));
    }

    #[test]
    fn reaching_the_score_limit_ends_the_game_for_the_lowest_scorer() {
        let (mut room, _rxs) = test_room(&["alice", "bob", "carol"]);
        force_playing(&mut room);
        room.state.player_mut(PlayerId(1)).unwrap().score = 10;
        room.state.player_mut(PlayerId(3)).unwrap().score = 6;

        room.state.player_mut(PlayerId(1)).unwrap().hand_count = 1;
        let closer = card(3, CardColor::Green, "G-3-22");
        block_on(room.handle_play(
            PlayerId(1),
            PlayRequest {
                cards: vec![closer],
                pick_up_card_id: None,
            },
        ))
        .unwrap();

        // alice 10, bob 9, carol 15: the limit is crossed and bob wins.
        assert_eq!(room.state.phase, GamePhase::GameEnd);
        assert_eq!(room.state.player(PlayerId(3)).unwrap().score, 15);
        assert_eq!(room.state.winner_id, Some(PlayerId(2)));
    }

    #[test]
    fn full_pass_around_resets_the_trick_but_not_the_round() {
        let (mut room, _rxs) = test_room(&["alice", "bob", "carol"]);
        force_playing(&mut room);

        block_on(room.handle_play(
            PlayerId(1),
            PlayRequest {
                cards: vec![card(5, CardColor::Red, "R-5-4")],
                pick_up_card_id: None,
            },
        ))
        .unwrap();

        block_on(room.handle_pass(PlayerId(2)));
        assert_eq!(room.state.consecutive_passes, 1);
        assert!(!room.state.center_stack.is_empty());
        assert_eq!(room.state.current_player_id, Some(PlayerId(3)));

        block_on(room.handle_pass(PlayerId(3)));
        assert_eq!(room.state.consecutive_passes, 0);
        assert!(room.state.center_stack.is_empty());
        assert_eq!(room.state.current_player_id, Some(PlayerId(1)));
        assert_eq!(room.state.phase, GamePhase::Playing);
    }

    #[test]
    fn next_round_redeals_and_rotates_the_starter() {
        let (mut room, mut rxs) = test_room(&["alice", "bob", "carol"]);
        force_playing(&mut room);
        room.state.player_mut(PlayerId(1)).unwrap().hand_count = 1;
        block_on(room.handle_play(
            PlayerId(1),
            PlayRequest {
                cards: vec![card(2, CardColor::Red, "R-2-1")],
                pick_up_card_id: None,
            },
        ))
        .unwrap();
        assert_eq!(room.state.phase, GamePhase::RoundEnd);
        for rx in rxs.iter_mut() {
            drain(rx);
        }

        block_on(room.next_round(PlayerId(1)));

        assert_eq!(room.state.phase, GamePhase::Playing);
        assert_eq!(room.state.current_player_id, Some(PlayerId(2)));
        assert_eq!(room.state.last_round_first_player_id, Some(PlayerId(2)));
        assert!(room.state.center_stack.is_empty());
        assert_eq!(room.state.consecutive_passes, 0);
        assert_eq!(room.state.winner_id, None);
        // Scores carry across rounds; hands are replaced wholesale.
        assert_eq!(room.state.player(PlayerId(2)).unwrap().score, 9);
        for p in &room.state.players {
            assert_eq!(p.hand_count, rules::HAND_SIZE);
        }
        for rx in rxs.iter_mut() {
            let responses = drain(rx);
            assert_eq!(dealt_cards(&responses).expect("redeal").len(), rules::HAND_SIZE);
        }
    }

    #[test]
    fn joining_a_started_game_is_refused() {
        let (mut room, _rxs) = test_room(&["alice", "bob"]);
        block_on(room.start(PlayerId(1)));

        let (tx, _rx) = mpsc::channel(64);
        let refused = room.join(PlayerId(9), "late".into(), tx);
        assert!(matches!(refused, Err(LobbyError::GameAlreadyStarted)));
    }

    #[test]
    fn a_room_holds_at_most_six_seats() {
        let (mut room, _rxs) = test_room(&["a", "b", "c", "d", "e", "f"]);
        let (tx, _rx) = mpsc::channel(64);
        let refused = room.join(PlayerId(9), "late".into(), tx);
        assert!(matches!(refused, Err(LobbyError::RoomFull)));
    }
}
