//! 手番側視点の 768 次元特徴量
//!
//! 12 プレーン × 64 マスの one-hot。プレーン 0〜5 が手番側（白として扱う側）の
//! ポーン〜キング、プレーン 6〜11 が相手側。インデックスは
//! `plane * 64 + square`。
//!
//! 盤面を反転する場合（`mirror = true`）は上下反転と色の入れ替えを先に行い、
//! 黒番の局面も白番として見えるようにする。

use crate::board::Board;
use crate::error::PlacementError;
use crate::types::{Color, Piece, Square};

/// プレーン数（駒種 6 × 色 2）
pub const NUM_PLANES: usize = 12;

/// 特徴量の次元数
pub const FEATURE_DIM: usize = NUM_PLANES * Square::NUM;

/// 固定長 768 の特徴量ベクトル（値は 0.0 か 1.0）
#[derive(Clone, PartialEq)]
pub struct FeatureVector {
    values: Box<[f32; FEATURE_DIM]>,
}

impl FeatureVector {
    pub fn zeros() -> Self {
        Self {
            values: Box::new([0.0; FEATURE_DIM]),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        FEATURE_DIM
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.values[..]
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<f32> {
        self.values.get(index).copied()
    }

    /// 1.0 が立っているインデックスを昇順に列挙
    pub fn active_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.values
            .iter()
            .enumerate()
            .filter(|(_, v)| **v != 0.0)
            .map(|(i, _)| i)
    }

    pub fn count_active(&self) -> usize {
        self.values.iter().filter(|v| **v != 0.0).count()
    }

    #[inline]
    fn set(&mut self, index: usize) {
        self.values[index] = 1.0;
    }
}

impl std::fmt::Debug for FeatureVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureVector")
            .field("active", &self.active_indices().collect::<Vec<_>>())
            .finish()
    }
}

/// 駒のプレーン番号
///
/// 白（手番側）は `type - 1`、黒（相手側）は `(type + 5) mod 12`。
#[inline]
pub const fn plane_of(piece: Piece) -> usize {
    let t = piece.piece_type.number();
    match piece.color {
        Color::White => t - 1,
        Color::Black => (t + 5) % NUM_PLANES,
    }
}

/// 駒とマスから特徴量インデックスを得る
#[inline]
pub const fn feature_index(piece: Piece, sq: Square) -> usize {
    plane_of(piece) * Square::NUM + sq.index()
}

/// 盤面を特徴量へ変換
pub fn encode_board(board: &Board, mirror: bool) -> FeatureVector {
    let mut features = FeatureVector::zeros();
    for (sq, piece) in board.pieces() {
        let (sq, piece) = if mirror {
            (sq.flip_vertical(), piece.flipped())
        } else {
            (sq, piece)
        };
        features.set(feature_index(piece, sq));
    }
    features
}

/// 配置文字列を特徴量へ変換
pub fn encode(placement: &str, mirror: bool) -> Result<FeatureVector, PlacementError> {
    let board = Board::from_placement(placement)?;
    Ok(encode_board(&board, mirror))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::STARTING_PLACEMENT;
    use crate::types::PieceType;
    use std::collections::BTreeSet;

    const SAMPLE_PLACEMENTS: &[&str] = &[
        STARTING_PLACEMENT,
        "8/8/8/8/8/8/8/8",
        "4k3/8/8/8/8/8/8/4K3",
        "r1bqk2r/pp2bppp/2n1pn2/3p4/2PP4/2N2N2/PP2BPPP/R1BQK2R",
        "8/5pk1/6p1/8/3Q4/6P1/5PK1/2q5",
        // 全マス埋まった盤面（合法ではないが符号化は可能）
        "qqqqqqqq/QQQQQQQQ/kkkkkkkk/KKKKKKKK/pppppppp/PPPPPPPP/rrrrrrrr/RRRRRRRR",
    ];

    fn index_set(fv: &FeatureVector) -> BTreeSet<usize> {
        fv.active_indices().collect()
    }

    /// 上下反転 + 手番ブロックの入れ替え
    fn reflect_index(idx: usize) -> usize {
        let plane = idx / Square::NUM;
        let sq = Square::from_index(idx % Square::NUM).unwrap();
        let other_plane = if plane < 6 { plane + 6 } else { plane - 6 };
        other_plane * Square::NUM + sq.flip_vertical().index()
    }

    #[test]
    fn test_plane_numbers() {
        for pt in PieceType::ALL {
            let own = plane_of(Piece::new(Color::White, pt));
            let opp = plane_of(Piece::new(Color::Black, pt));
            assert_eq!(own, pt.number() - 1);
            assert_eq!(opp, pt.number() + 5);
            assert!(own < 6);
            assert!((6..12).contains(&opp));
        }
    }

    #[test]
    fn test_starting_position_block_counts() {
        let fv = encode(STARTING_PLACEMENT, false).unwrap();
        assert_eq!(fv.len(), 768);
        assert_eq!(fv.count_active(), 32);

        let own = fv.active_indices().filter(|&i| i < 6 * 64).count();
        let opp = fv.active_indices().filter(|&i| i >= 6 * 64).count();
        assert_eq!(own, 16);
        assert_eq!(opp, 16);

        // e1 の白キング: plane 5, square 4
        assert_eq!(fv.get(5 * 64 + 4), Some(1.0));
        // e8 の黒キング: plane 11, square 60
        assert_eq!(fv.get(11 * 64 + 60), Some(1.0));
    }

    #[test]
    fn test_active_count_matches_piece_count() {
        for placement in SAMPLE_PLACEMENTS {
            let board = Board::from_placement(placement).unwrap();
            for mirror in [false, true] {
                let fv = encode(placement, mirror).unwrap();
                assert_eq!(fv.as_slice().len(), FEATURE_DIM);
                assert_eq!(fv.count_active(), board.piece_count(), "{placement} mirror={mirror}");
                assert!(fv.as_slice().iter().all(|&v| v == 0.0 || v == 1.0));
            }
        }
    }

    #[test]
    fn test_full_board_has_no_collisions() {
        let fv = encode(SAMPLE_PLACEMENTS[5], false).unwrap();
        assert_eq!(fv.count_active(), 64);
        assert!(fv.active_indices().all(|i| i < FEATURE_DIM));
    }

    #[test]
    fn test_empty_board_encodes_to_zeros() {
        let fv = encode("8/8/8/8/8/8/8/8", true).unwrap();
        assert_eq!(fv.count_active(), 0);
        assert_eq!(fv, FeatureVector::zeros());
    }

    #[test]
    fn test_mirror_reflects_index_sets() {
        for placement in SAMPLE_PLACEMENTS {
            let plain = index_set(&encode(placement, false).unwrap());
            let mirrored = index_set(&encode(placement, true).unwrap());
            let reflected: BTreeSet<usize> = plain.iter().map(|&i| reflect_index(i)).collect();
            assert_eq!(reflected, mirrored, "{placement}");
        }
    }

    #[test]
    fn test_mirrored_board_with_toggled_flag_is_identical() {
        for placement in SAMPLE_PLACEMENTS {
            let board = Board::from_placement(placement).unwrap();
            let mirrored = board.mirror();
            assert_eq!(encode_board(&board, false), encode_board(&mirrored, true));
            assert_eq!(encode_board(&board, true), encode_board(&mirrored, false));
        }
    }

    #[test]
    fn test_mover_is_always_planes_0_to_5() {
        // 黒番の局面を反転すると黒の駒が手番側プレーンに入る
        let fv = encode("4k3/8/8/8/8/8/8/4K2Q", true).unwrap();
        // 黒キング e8 -> 反転後 e1 の白キング扱い
        assert_eq!(fv.get(5 * 64 + 4), Some(1.0));
        // 白クイーン h1 -> 反転後 h8 の相手クイーン
        assert_eq!(fv.get(10 * 64 + 63), Some(1.0));
    }

    #[test]
    fn test_invalid_placement_is_rejected() {
        assert!(encode("rnbqkbnr/pppppppp/8/8", false).is_err());
        assert!(encode("", false).is_err());
    }
}
