//! 基本型（手番・駒種・駒・マス）

mod color;
mod piece;
mod square;

pub use color::Color;
pub use piece::{Piece, PieceType};
pub use square::Square;
