//! コーパス行のパース
//!
//! 1行は `<placement> <metadata...>|<score1>|<score2>` の形式。
//! 4つ目以降のフィールドは無視する。

use crate::error::MalformedRecord;

/// コーパス1行分の局面レコード（行バッファを借用する）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionRecord<'a> {
    /// 盤面部分のみの配置文字列
    pub placement: &'a str,
    /// メタデータに `w` を含むなら白番
    pub white_to_move: bool,
    pub score1: i32,
    pub score2: i32,
}

impl<'a> PositionRecord<'a> {
    /// 1行をパースする（末尾の `\n` / `\r\n` は取り除く）
    pub fn parse(line: &'a str) -> Result<Self, MalformedRecord> {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let line = line.strip_suffix('\r').unwrap_or(line);

        let mut fields = line.split('|');
        let (Some(position), Some(s1), Some(s2)) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(MalformedRecord::MissingDelimiter(line.split('|').count()));
        };

        let (placement, metadata) =
            position.split_once(' ').ok_or(MalformedRecord::MissingMetadata)?;
        if placement.is_empty() {
            return Err(MalformedRecord::EmptyPlacement);
        }

        Ok(PositionRecord {
            placement,
            white_to_move: metadata.contains('w'),
            score1: parse_score(1, s1)?,
            score2: parse_score(2, s2)?,
        })
    }

    /// 特徴量化の際に盤面を反転するか（黒番なら反転）
    #[inline]
    pub fn mirror(&self) -> bool {
        !self.white_to_move
    }
}

fn parse_score(field: usize, text: &str) -> Result<i32, MalformedRecord> {
    text.trim().parse::<i32>().map_err(|_| MalformedRecord::InvalidScore {
        field,
        value: text.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR";

    #[test]
    fn test_parse_white_to_move() {
        let line = format!("{START} w KQkq - 0 1|120|1\n");
        let rec = PositionRecord::parse(&line).unwrap();
        assert_eq!(rec.placement, START);
        assert!(rec.white_to_move);
        assert!(!rec.mirror());
        assert_eq!(rec.score1, 120);
        assert_eq!(rec.score2, 1);
    }

    #[test]
    fn test_parse_black_to_move_crlf() {
        let rec = PositionRecord::parse("4k3/8/8/8/8/8/8/4K3 b - - 0 40|-35|0\r\n").unwrap();
        assert!(!rec.white_to_move);
        assert!(rec.mirror());
        assert_eq!(rec.score1, -35);
        assert_eq!(rec.score2, 0);
    }

    #[test]
    fn test_scores_are_trimmed() {
        let rec = PositionRecord::parse("8/8/8/8/8/8/8/8 w | 7 |  -2 ").unwrap();
        assert_eq!((rec.score1, rec.score2), (7, -2));
    }

    #[test]
    fn test_extra_fields_are_ignored() {
        let rec = PositionRecord::parse("8/8/8/8/8/8/8/8 w|5|6|extra|more").unwrap();
        assert_eq!((rec.score1, rec.score2), (5, 6));
    }

    #[test]
    fn test_missing_delimiter() {
        assert_eq!(
            PositionRecord::parse("8/8/8/8/8/8/8/8 w|5"),
            Err(MalformedRecord::MissingDelimiter(2))
        );
        assert_eq!(PositionRecord::parse(""), Err(MalformedRecord::MissingDelimiter(1)));
    }

    #[test]
    fn test_missing_metadata() {
        assert_eq!(
            PositionRecord::parse("8/8/8/8/8/8/8/8|1|2"),
            Err(MalformedRecord::MissingMetadata)
        );
    }

    #[test]
    fn test_empty_placement() {
        assert_eq!(PositionRecord::parse(" w|1|2"), Err(MalformedRecord::EmptyPlacement));
    }

    #[test]
    fn test_invalid_scores() {
        assert!(matches!(
            PositionRecord::parse("8/8/8/8/8/8/8/8 w|abc|2"),
            Err(MalformedRecord::InvalidScore { field: 1, .. })
        ));
        assert!(matches!(
            PositionRecord::parse("8/8/8/8/8/8/8/8 w|1|"),
            Err(MalformedRecord::InvalidScore { field: 2, .. })
        ));
        assert!(matches!(
            PositionRecord::parse("8/8/8/8/8/8/8/8 w|1.5|2"),
            Err(MalformedRecord::InvalidScore { field: 1, .. })
        ));
    }

    #[test]
    fn test_marker_only_checked_in_metadata() {
        // 配置文字列には 'w' が現れない（白のポーンは 'P'）が、メタデータ側だけを見る
        let rec = PositionRecord::parse("8/8/8/8/8/8/8/8 b KQkq - 0 1|0|0").unwrap();
        assert!(!rec.white_to_move);
    }
}
