//! マス（Square）
//!
//! a1 = 0, b1 = 1, ..., h8 = 63 の並び。

use std::fmt;

/// 盤上のマス（0..64）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Square(u8);

impl Square {
    /// マスの数
    pub const NUM: usize = 64;

    /// 筋（0=a）と段（0=1段目）から生成
    #[inline]
    pub const fn new(file: u8, rank: u8) -> Option<Square> {
        if file < 8 && rank < 8 {
            Some(Square(rank * 8 + file))
        } else {
            None
        }
    }

    /// インデックスから生成
    #[inline]
    pub const fn from_index(index: usize) -> Option<Square> {
        if index < Self::NUM {
            Some(Square(index as u8))
        } else {
            None
        }
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub const fn file(self) -> u8 {
        self.0 & 7
    }

    #[inline]
    pub const fn rank(self) -> u8 {
        self.0 >> 3
    }

    /// 上下反転（段を逆順にする）
    #[inline]
    pub const fn flip_vertical(self) -> Square {
        Square(self.0 ^ 56)
    }

    /// 全マスを a1 から順に列挙
    pub fn all() -> impl Iterator<Item = Square> {
        (0..Self::NUM as u8).map(Square)
    }
}

/// 代数表記（`e4` など）
impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", (b'a' + self.file()) as char, self.rank() + 1)
    }
}
