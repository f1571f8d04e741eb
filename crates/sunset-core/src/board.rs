//! 盤面（配置文字列の解析と上下反転）

use crate::error::PlacementError;
use crate::types::{Piece, Square};

/// 初期局面の配置文字列
pub const STARTING_PLACEMENT: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR";

/// 64 マスの駒配置
#[derive(Clone, PartialEq, Eq)]
pub struct Board {
    squares: [Option<Piece>; Square::NUM],
}

impl Board {
    /// 駒のない盤面
    pub const fn empty() -> Board {
        Board {
            squares: [None; Square::NUM],
        }
    }

    /// 配置文字列（8段目から1段目へ `/` 区切り）を解析
    pub fn from_placement(placement: &str) -> Result<Board, PlacementError> {
        let ranks: Vec<&str> = placement.split('/').collect();
        if ranks.len() != 8 {
            return Err(PlacementError::RankCount(ranks.len()));
        }

        let mut board = Board::empty();
        for (i, rank_str) in ranks.iter().enumerate() {
            // 先頭が8段目
            let rank = 7 - i as u8;
            let mut file: usize = 0;
            for c in rank_str.chars() {
                if let Some(d) = c.to_digit(10) {
                    if !(1..=8).contains(&d) {
                        return Err(PlacementError::InvalidChar(c));
                    }
                    file += d as usize;
                } else {
                    let piece = Piece::from_fen_char(c).ok_or(PlacementError::InvalidChar(c))?;
                    if file < 8 {
                        let sq = Square::new(file as u8, rank).expect("file and rank are < 8");
                        board.squares[sq.index()] = Some(piece);
                    }
                    file += 1;
                }
                if file > 8 {
                    return Err(PlacementError::RankWidth {
                        rank: rank as usize + 1,
                        files: file,
                    });
                }
            }
            if file != 8 {
                return Err(PlacementError::RankWidth {
                    rank: rank as usize + 1,
                    files: file,
                });
            }
        }
        Ok(board)
    }

    #[inline]
    pub fn piece_on(&self, sq: Square) -> Option<Piece> {
        self.squares[sq.index()]
    }

    #[inline]
    pub fn set_piece(&mut self, sq: Square, piece: Option<Piece>) {
        self.squares[sq.index()] = piece;
    }

    /// 駒のあるマスを a1 から順に列挙
    pub fn pieces(&self) -> impl Iterator<Item = (Square, Piece)> + '_ {
        Square::all().filter_map(|sq| self.piece_on(sq).map(|p| (sq, p)))
    }

    pub fn piece_count(&self) -> usize {
        self.squares.iter().filter(|p| p.is_some()).count()
    }

    /// 上下反転して色を入れ替えた盤面
    ///
    /// 手番側を常に白として扱うための変換。2回適用すると元に戻る。
    pub fn mirror(&self) -> Board {
        let mut mirrored = Board::empty();
        for (sq, piece) in self.pieces() {
            mirrored.set_piece(sq.flip_vertical(), Some(piece.flipped()));
        }
        mirrored
    }

    /// 配置文字列へ変換
    pub fn to_placement(&self) -> String {
        let mut result = String::with_capacity(72);
        for rank in (0..8u8).rev() {
            let mut empty = 0;
            for file in 0..8u8 {
                let sq = Square::new(file, rank).expect("file and rank are < 8");
                match self.piece_on(sq) {
                    Some(piece) => {
                        if empty > 0 {
                            result.push_str(&empty.to_string());
                            empty = 0;
                        }
                        result.push(piece.fen_char());
                    }
                    None => empty += 1,
                }
            }
            if empty > 0 {
                result.push_str(&empty.to_string());
            }
            if rank > 0 {
                result.push('/');
            }
        }
        result
    }
}

impl Default for Board {
    fn default() -> Self {
        Board::empty()
    }
}

impl std::fmt::Debug for Board {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Board({})", self.to_placement())
    }
}
