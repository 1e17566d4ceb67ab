use std::fmt;

use serde::{Deserialize, Serialize};

/// The six colors making up the 54-card deck.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub enum CardColor {
    Red,
    Blue,
    Green,
    Yellow,
    Purple,
    Orange,
}

impl CardColor {
    /// Single-letter prefix used when minting card ids, e.g. `R-1-0`.
    pub fn initial(self) -> char {
        match self {
            CardColor::Red => 'R',
            CardColor::Blue => 'B',
            CardColor::Green => 'G',
            CardColor::Yellow => 'Y',
            CardColor::Purple => 'P',
            CardColor::Orange => 'O',
        }
    }
}

/// Opaque card identity, unique within one deck.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct CardId(pub String);

/// A single card. Identity is the `id`: two cards of equal color and value
/// are still distinct cards.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct Card {
    pub id: CardId,
    pub value: u8,
    pub color: CardColor,
}

/// Transport identity of a peer, minted by the hosting process.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct PlayerId(pub u64);

/// Four-digit room code.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct RoomCode(pub u16);

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.0)
    }
}

/// The public view of a seated player. `hand_count` is the only hand
/// information other peers ever see.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub is_host: bool,
    pub hand_count: usize,
    pub score: u32,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub enum Phase {
    Lobby,
    Playing,
    RoundEnd,
    GameEnd,
}

/// The public, replicated game state. The room's engine holds the only
/// writable copy; everyone else receives full snapshots of it.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct GameState {
    pub room_code: RoomCode,
    pub host_id: PlayerId,
    pub phase: Phase,
    pub players: Vec<Player>,
    pub current_player_id: Option<PlayerId>,
    pub center_stack: Vec<Vec<Card>>,
    pub deck_size: usize,
    pub consecutive_passes: usize,
    pub winner_id: Option<PlayerId>,
    pub last_round_first_player_id: Option<PlayerId>,
}

impl GameState {
    pub fn new(room_code: RoomCode, host_id: PlayerId) -> Self {
        GameState {
            room_code,
            host_id,
            phase: Phase::Lobby,
            players: Vec::new(),
            current_player_id: None,
            center_stack: Vec::new(),
            deck_size: 0,
            consecutive_passes: 0,
            winner_id: None,
            last_round_first_player_id: None,
        }
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn player_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == id)
    }

    /// Append a player at the end of the seat order.
    pub fn add_player(&mut self, player: Player) {
        self.players.push(player);
    }

    /// The only set of the center stack that matters for play legality.
    pub fn top_center_cards(&self) -> &[Card] {
        self.center_stack.last().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Strict round-robin over the seat order. Seats never move once taken,
    /// so an unknown id wraps to the first seat.
    pub fn next_player_after(&self, id: PlayerId) -> Option<PlayerId> {
        if self.players.is_empty() {
            return None;
        }
        let next_idx = self
            .players
            .iter()
            .position(|p| p.id == id)
            .map(|idx| (idx + 1) % self.players.len())
            .unwrap_or(0);
        Some(self.players[next_idx].id)
    }

    pub fn is_current(&self, id: PlayerId) -> bool {
        self.current_player_id == Some(id)
    }

    /// The player with the lowest cumulative score; ties go to the earliest
    /// seat.
    pub fn lowest_scorer(&self) -> Option<PlayerId> {
        let mut best: Option<&Player> = None;
        for p in &self.players {
            match best {
                Some(b) if p.score >= b.score => {}
                _ => best = Some(p),
            }
        }
        best.map(|p| p.id)
    }
}
