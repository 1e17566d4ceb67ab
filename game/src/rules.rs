//! The rules of the game: deck composition and play legality.
//!
//! Everything here is pure and runs identically on the host and on clients.
//! The host's verdict is authoritative; clients call `validate_play` before
//! sending an intent so that a well-behaved UI rarely submits a rejectable
//! play.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use snafu::Snafu;

use crate::model::{Card, CardColor, CardId};

pub const COLORS: [CardColor; 6] = [
    CardColor::Red,
    CardColor::Blue,
    CardColor::Green,
    CardColor::Yellow,
    CardColor::Purple,
    CardColor::Orange,
];

pub const MIN_VALUE: u8 = 1;
pub const MAX_VALUE: u8 = 9;

/// 6 colors x values 1..=9.
pub const DECK_SIZE: usize = 54;

/// Cards dealt to each player at the start of a round.
pub const HAND_SIZE: usize = 9;

/// Build a fresh, shuffled 54-card deck: every (color, value) pair exactly
/// once. Ids are unique within the deck only; each call mints a new sequence.
pub fn create_deck<R: Rng>(rng: &mut R) -> Vec<Card> {
    let mut deck = Vec::with_capacity(DECK_SIZE);
    let mut id_counter = 0u32;
    for &color in COLORS.iter() {
        for value in MIN_VALUE..=MAX_VALUE {
            deck.push(Card {
                id: CardId(format!("{}-{}-{}", color.initial(), value, id_counter)),
                value,
                color,
            });
            id_counter += 1;
        }
    }
    deck.shuffle(rng);
    deck
}

/// The total ordering key for comparing plays: card values concatenated in
/// descending order as decimal digits, e.g. {2, 8} -> 82. Not a sum.
pub fn combination_value(cards: &[Card]) -> u64 {
    let mut values: Vec<u8> = cards.iter().map(|c| c.value).collect();
    values.sort_unstable_by(|a, b| b.cmp(a));
    values
        .into_iter()
        .fold(0u64, |acc, v| acc * 10 + u64::from(v))
}

/// A single card always stands alone; multiple cards must all share one
/// color or all share one value. An empty selection is no play at all.
pub fn is_valid_combination(cards: &[Card]) -> bool {
    match cards {
        [] => false,
        [_] => true,
        [first, rest @ ..] => {
            rest.iter().all(|c| c.color == first.color)
                || rest.iter().all(|c| c.value == first.value)
        }
    }
}

/// Why a proposed play was refused. Carried over the wire in the rejection
/// notice, so the display strings are user-facing.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Snafu)]
pub enum PlayRejection {
    #[snafu(display("cards must all share one color or one value"))]
    SameColorOrValueRequired,

    #[snafu(display("the opening play must be a single card or the whole hand"))]
    FirstPlaySingleOrWholeHand,

    #[snafu(display("must play {} or {} cards", count, count_plus_one))]
    MustPlayCount { count: usize, count_plus_one: usize },

    #[snafu(display("value {} is not strictly higher than {}", played, center))]
    ValueNotStrictlyHigher { played: u64, center: u64 },

    #[snafu(display("a card must be picked up from the covered set"))]
    PickUpRequired,

    #[snafu(display("the picked-up card is not in the covered set"))]
    PickUpNotInTopSet,
}

/// Decide whether `played` may cover `center_top`, returning the play's
/// combination value on success.
///
/// `hand_size` enables the opening-play restriction (single card or whole
/// hand on an empty stack). The host leaves it out; clients pass their own
/// hand size when pre-validating.
pub fn validate_play(
    played: &[Card],
    center_top: &[Card],
    hand_size: Option<usize>,
) -> Result<u64, PlayRejection> {
    if !is_valid_combination(played) {
        return Err(PlayRejection::SameColorOrValueRequired);
    }

    if center_top.is_empty() {
        if let Some(hand_size) = hand_size {
            if played.len() > 1 && played.len() != hand_size {
                return Err(PlayRejection::FirstPlaySingleOrWholeHand);
            }
        }
        return Ok(combination_value(played));
    }

    let count_diff = played.len() as isize - center_top.len() as isize;
    if count_diff != 0 && count_diff != 1 {
        return Err(PlayRejection::MustPlayCount {
            count: center_top.len(),
            count_plus_one: center_top.len() + 1,
        });
    }

    let played_value = combination_value(played);

    // One extra card beats the top set outright, whatever the values say.
    if count_diff == 1 {
        return Ok(played_value);
    }

    let center_value = combination_value(center_top);
    if played_value <= center_value {
        return Err(PlayRejection::ValueNotStrictlyHigher {
            played: played_value,
            center: center_value,
        });
    }

    Ok(played_value)
}
