//! Per-kind action rules.
//!
//! Rules are thin: they validate an action against the current state and
//! describe its effect. They never mutate the game; the coordinator records
//! the effect on an event and the aggregate applies it.

use std::collections::BTreeMap;

use serde_json::json;

use playhub_core::error::AppError;
use playhub_core::result::AppResult;
use playhub_core::types::{ActionEffect, GameAction, GameState};

use crate::aggregate::Game;

const MAX_MOVE: u32 = 10;

/// Evaluate an action by `identity_id` against `game`.
pub fn evaluate(game: &Game, identity_id: &str, action: &GameAction) -> AppResult<ActionEffect> {
    let multiplier = game.settings.difficulty.multiplier();
    let active: Vec<&str> = game
        .active_players()
        .map(|p| p.identity_id.as_str())
        .collect();

    match (action, &game.state) {
        (GameAction::AdvanceRound, state) => Ok(ActionEffect {
            score_delta: 0,
            progress: None,
            advance_round: true,
            state: next_round(state),
        }),

        (GameAction::Answer { question, correct }, GameState::Trivia { question: open, answered }) => {
            if question != open {
                return Err(AppError::validation(format!(
                    "Question {question} is not open (current question is {open})"
                )));
            }
            if answered.contains_key(identity_id) {
                return Err(AppError::conflict("Question already answered"));
            }
            let mut answered = answered.clone();
            answered.insert(identity_id.to_string(), *correct);
            let state = GameState::Trivia {
                question: *open,
                answered,
            };
            let round_over = everyone_done(&active, |id| match &state {
                GameState::Trivia { answered, .. } => answered.contains_key(id),
                _ => false,
            });
            Ok(ActionEffect {
                score_delta: if *correct { 10 * multiplier } else { 0 },
                progress: Some(json!({ "last_answer_correct": correct })),
                advance_round: round_over,
                state: if round_over { next_round(&state) } else { state },
            })
        }

        (
            GameAction::Move { distance },
            GameState::Race {
                track_length,
                positions,
                finish_order,
            },
        ) => {
            if *distance == 0 || *distance > MAX_MOVE {
                return Err(AppError::validation(format!(
                    "Move distance must be between 1 and {MAX_MOVE}"
                )));
            }
            if finish_order.iter().any(|id| id == identity_id) {
                return Err(AppError::conflict("Player already finished this round"));
            }
            let current = positions.get(identity_id).copied().unwrap_or(0);
            let position = (current + distance).min(*track_length);
            let mut positions = positions.clone();
            positions.insert(identity_id.to_string(), position);
            let mut finish_order = finish_order.clone();
            let mut score_delta = i64::from(position - current);
            if position == *track_length {
                finish_order.push(identity_id.to_string());
                let place = finish_order.len();
                let bonus = active.len().saturating_sub(place) as i64 + 1;
                score_delta += bonus * 5 * multiplier;
            }
            let state = GameState::Race {
                track_length: *track_length,
                positions,
                finish_order,
            };
            let round_over = everyone_done(&active, |id| match &state {
                GameState::Race { finish_order, .. } => finish_order.iter().any(|f| f == id),
                _ => false,
            });
            Ok(ActionEffect {
                score_delta,
                progress: Some(json!({ "position": position })),
                advance_round: round_over,
                state: if round_over { next_round(&state) } else { state },
            })
        }

        (
            GameAction::PlacePiece { piece },
            GameState::Puzzle {
                pieces,
                placed,
                hints_used,
            },
        ) => {
            if piece >= pieces {
                return Err(AppError::validation(format!(
                    "Piece {piece} does not exist (puzzle has {pieces} pieces)"
                )));
            }
            if placed.contains_key(piece) {
                return Err(AppError::conflict(format!("Piece {piece} is already placed")));
            }
            let mut placed = placed.clone();
            placed.insert(*piece, identity_id.to_string());
            let placed_by_player = placed.values().filter(|id| *id == identity_id).count();
            let complete = placed.len() as u32 == *pieces;
            let state = GameState::Puzzle {
                pieces: *pieces,
                placed,
                hints_used: hints_used.clone(),
            };
            Ok(ActionEffect {
                score_delta: 5 * multiplier,
                progress: Some(json!({ "pieces_placed": placed_by_player })),
                advance_round: complete,
                state: if complete { next_round(&state) } else { state },
            })
        }

        (
            GameAction::UseHint,
            GameState::Puzzle {
                pieces,
                placed,
                hints_used,
            },
        ) => {
            let mut hints_used = hints_used.clone();
            let used = hints_used.entry(identity_id.to_string()).or_insert(0);
            *used += 1;
            let used = *used;
            Ok(ActionEffect {
                score_delta: -multiplier,
                progress: Some(json!({ "hints_used": used })),
                advance_round: false,
                state: GameState::Puzzle {
                    pieces: *pieces,
                    placed: placed.clone(),
                    hints_used,
                },
            })
        }

        (action, state) => Err(AppError::validation(format!(
            "Action '{}' is not valid for {} games",
            action.name(),
            state.kind()
        ))),
    }
}

fn everyone_done(active: &[&str], done: impl Fn(&str) -> bool) -> bool {
    !active.is_empty() && active.iter().all(|id| done(id))
}

/// State at the start of the next round.
fn next_round(state: &GameState) -> GameState {
    match state {
        GameState::Trivia { question, .. } => GameState::Trivia {
            question: question + 1,
            answered: BTreeMap::new(),
        },
        GameState::Race { track_length, .. } => GameState::Race {
            track_length: *track_length,
            positions: BTreeMap::new(),
            finish_order: Vec::new(),
        },
        GameState::Puzzle { pieces, .. } => GameState::Puzzle {
            pieces: *pieces,
            placed: BTreeMap::new(),
            hints_used: BTreeMap::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use playhub_core::error::ErrorKind;
    use playhub_core::types::{
        Difficulty, GameId, GameKind, GameSettings, GameStatus, PlayerStatus,
    };

    use crate::aggregate::Player;

    fn game(kind: GameKind, players: &[&str]) -> Game {
        let mut params = BTreeMap::new();
        params.insert("track_length".to_string(), json!(10));
        params.insert("pieces".to_string(), json!(2));
        let settings = GameSettings {
            max_players: 4,
            difficulty: Difficulty::Easy,
            total_rounds: 3,
            params,
        };
        let now = Utc::now();
        Game {
            id: GameId::new(),
            kind,
            status: GameStatus::Active,
            players: players
                .iter()
                .map(|id| Player {
                    identity_id: id.to_string(),
                    display_name: id.to_string(),
                    joined_at: now,
                    status: PlayerStatus::Active,
                    score: 0,
                    progress: serde_json::Value::Null,
                })
                .collect(),
            current_round: 1,
            state: GameState::initial(kind, &settings),
            settings,
            version: 3,
            created_by: None,
            created_at: now,
            started_at: Some(now),
            completed_at: None,
            updated_at: now,
        }
    }

    #[test]
    fn test_wrong_kind_is_validation_error() {
        let g = game(GameKind::Trivia, &["a", "b"]);
        let err = evaluate(&g, "a", &GameAction::Move { distance: 3 }).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[test]
    fn test_trivia_round_ends_when_all_answer() {
        let mut g = game(GameKind::Trivia, &["a", "b"]);
        let first = evaluate(&g, "a", &GameAction::Answer { question: 0, correct: true }).unwrap();
        assert_eq!(first.score_delta, 10);
        assert!(!first.advance_round);
        g.apply_effect("a", &first);

        let dup = evaluate(&g, "a", &GameAction::Answer { question: 0, correct: false });
        assert_eq!(dup.unwrap_err().kind, ErrorKind::Conflict);

        let second = evaluate(&g, "b", &GameAction::Answer { question: 0, correct: false }).unwrap();
        assert!(second.advance_round);
        assert_eq!(
            second.state,
            GameState::Trivia {
                question: 1,
                answered: BTreeMap::new()
            }
        );
    }

    #[test]
    fn test_race_finish_bonus() {
        let mut g = game(GameKind::Race, &["a", "b"]);
        let step = evaluate(&g, "a", &GameAction::Move { distance: 6 }).unwrap();
        g.apply_effect("a", &step);
        let finish = evaluate(&g, "a", &GameAction::Move { distance: 6 }).unwrap();
        // 4 units to the line plus a first-place bonus of 2 * 5.
        assert_eq!(finish.score_delta, 4 + 10);
        assert!(!finish.advance_round);
        assert!(evaluate(&g, "a", &GameAction::Move { distance: 11 }).is_err());
    }

    #[test]
    fn test_puzzle_hint_costs_points() {
        let g = game(GameKind::Puzzle, &["a", "b"]);
        let hint = evaluate(&g, "a", &GameAction::UseHint).unwrap();
        assert_eq!(hint.score_delta, -1);
        assert_eq!(hint.progress, Some(json!({ "hints_used": 1 })));
        let err = evaluate(&g, "a", &GameAction::PlacePiece { piece: 9 }).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }
}
