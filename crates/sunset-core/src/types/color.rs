//! 駒の色

/// 駒の色。FEN では大文字が白、小文字が黒。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    White,
    Black,
}

impl Color {
    /// 反転時の色
    #[inline]
    pub const fn opponent(self) -> Color {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }

    /// FEN の駒文字の大小から色を決める
    #[inline]
    pub const fn of_fen_char(c: char) -> Color {
        if c.is_ascii_uppercase() { Color::White } else { Color::Black }
    }

    /// 小文字の駒文字をこの色の表記にする
    #[inline]
    pub const fn fen_case(self, lower: char) -> char {
        match self {
            Color::White => lower.to_ascii_uppercase(),
            Color::Black => lower,
        }
    }
}
