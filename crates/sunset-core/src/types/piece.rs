//! 駒種（PieceType）と駒（Piece）

use super::Color;

/// 駒種
///
/// 番号はポーン=1 〜 キング=6。特徴量のプレーン計算はこの番号を直接使う。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum PieceType {
    Pawn = 1,
    Knight = 2,
    Bishop = 3,
    Rook = 4,
    Queen = 5,
    King = 6,
}

impl PieceType {
    /// 駒種の数
    pub const NUM: usize = 6;

    /// 全ての駒種
    pub const ALL: [PieceType; 6] = [
        PieceType::Pawn,
        PieceType::Knight,
        PieceType::Bishop,
        PieceType::Rook,
        PieceType::Queen,
        PieceType::King,
    ];

    /// 駒種番号（1〜6）
    #[inline]
    pub const fn number(self) -> usize {
        self as usize
    }

    /// 小文字の FEN 文字から駒種を得る
    pub const fn from_lower_char(c: char) -> Option<PieceType> {
        match c {
            'p' => Some(PieceType::Pawn),
            'n' => Some(PieceType::Knight),
            'b' => Some(PieceType::Bishop),
            'r' => Some(PieceType::Rook),
            'q' => Some(PieceType::Queen),
            'k' => Some(PieceType::King),
            _ => None,
        }
    }

    /// 小文字の FEN 文字
    pub const fn lower_char(self) -> char {
        match self {
            PieceType::Pawn => 'p',
            PieceType::Knight => 'n',
            PieceType::Bishop => 'b',
            PieceType::Rook => 'r',
            PieceType::Queen => 'q',
            PieceType::King => 'k',
        }
    }
}

/// 駒（色 + 駒種）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Piece {
    pub color: Color,
    pub piece_type: PieceType,
}

impl Piece {
    #[inline]
    pub const fn new(color: Color, piece_type: PieceType) -> Piece {
        Piece { color, piece_type }
    }

    /// FEN の駒文字（大文字=白、小文字=黒）から駒を得る
    pub fn from_fen_char(c: char) -> Option<Piece> {
        let color = Color::of_fen_char(c);
        PieceType::from_lower_char(c.to_ascii_lowercase()).map(|pt| Piece::new(color, pt))
    }

    /// FEN の駒文字
    pub fn fen_char(self) -> char {
        self.color.fen_case(self.piece_type.lower_char())
    }

    /// 色を反転した駒
    #[inline]
    pub const fn flipped(self) -> Piece {
        Piece::new(self.color.opponent(), self.piece_type)
    }
}
