// src/main.rs
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use lazy_static::lazy_static;
use regex::Regex;

// --- Constants ---
const START_POSITION: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq";
const DEFAULT_LOG_FILENAME: &str = "chess_game_log.json";

// 0-indexed columns. The king starts on column 4; castling kingside lands it
// on column 6, queenside on column 1, with the rook coming in from the
// corner on the same wing.
const KINGSIDE_KING_COL: i8 = 6;
const QUEENSIDE_KING_COL: i8 = 1;
const KINGSIDE_ROOK_COL: i8 = 7;
const QUEENSIDE_ROOK_COL: i8 = 0;

// Ray scan order: horizontal, vertical, then diagonal. Attack analysis
// reports the first ray that yields an attacker, so the order decides which
// piece is named when several attack at once.
const RAY_DIRS: [(i8, i8); 8] = [
    (0, -1), (0, 1),                      // horizontal
    (-1, 0), (1, 0),                      // vertical
    (-1, -1), (-1, 1), (1, 1), (1, -1),   // diagonal
];

const KNIGHT_OFFSETS: [(i8, i8); 8] = [
    (-2, -1), (-2, 1),
    (-1, -2), (-1, 2),
    (1, -2), (1, 2),
    (2, -1), (2, 1),
];

// --- Coordinate ---

/// A square on the board. Row 0 is the eighth rank (the far edge for White),
/// column 0 is the A file. A constructed Coordinate is always in range;
/// out-of-range text simply fails to parse.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq)]
struct Coordinate {
    row: i8,
    col: i8,
}

impl Coordinate {
    fn new(row: i8, col: i8) -> Self {
        debug_assert!((0..8).contains(&row) && (0..8).contains(&col));
        Coordinate { row, col }
    }

    /// Decodes a two-character square reference such as "E2". Either case is
    /// accepted for the file letter. Returns None for anything malformed.
    fn parse(text: &str) -> Option<Coordinate> {
        let mut chars = text.chars();
        let file = chars.next()?.to_ascii_uppercase();
        let rank = chars.next()?;
        if chars.next().is_some() {
            return None;
        }
        if !('A'..='H').contains(&file) || !('1'..='8').contains(&rank) {
            return None;
        }
        Some(Coordinate {
            row: 7 - (rank as u8 - b'1') as i8,
            col: (file as u8 - b'A') as i8,
        })
    }

    /// The square displaced by (dr, dc), or None if that leaves the board.
    fn offset(self, dr: i8, dc: i8) -> Option<Coordinate> {
        let row = self.row + dr;
        let col = self.col + dc;
        if (0..8).contains(&row) && (0..8).contains(&col) {
            Some(Coordinate { row, col })
        } else {
            None
        }
    }

    fn algebraic(&self) -> String {
        format!("{}{}", (b'A' + self.col as u8) as char, 8 - self.row)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.algebraic())
    }
}

// --- Side ---

#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq)]
enum Side {
    Black,
    White,
}

impl Side {
    fn opponent(self) -> Side {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }

    /// Index into the king-position cache (Black 0, White 1).
    fn index(self) -> usize {
        match self {
            Side::Black => 0,
            Side::White => 1,
        }
    }

    /// The back rank this side's pieces start on.
    fn home_row(self) -> i8 {
        match self {
            Side::Black => 0,
            Side::White => 7,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Black => write!(f, "Black"),
            Side::White => write!(f, "White"),
        }
    }
}

// --- Piece ---

#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq)]
enum PieceKind {
    Pawn,
    Knight,
    Bishop,
    Rook,
    Queen,
    King,
}

impl PieceKind {
    fn name(self) -> &'static str {
        match self {
            PieceKind::Pawn => "Pawn",
            PieceKind::Knight => "Knight",
            PieceKind::Bishop => "Bishop",
            PieceKind::Rook => "Rook",
            PieceKind::Queen => "Queen",
            PieceKind::King => "King",
        }
    }
}

/// A piece on the board. `just_castled` is meaningful only for kings and
/// only between castling validation and the matching commit or rollback; it
/// tells the move-application primitive to relocate the rook as well.
#[derive(Debug, Serialize, Copy, Clone, PartialEq, Eq)]
struct Piece {
    kind: PieceKind,
    side: Side,
    pos: Coordinate,
    just_castled: bool,
}

impl Piece {
    fn from_fen_char(pos: Coordinate, ch: char) -> Option<Self> {
        let side = if ch.is_ascii_uppercase() { Side::White } else { Side::Black };
        let kind = match ch.to_ascii_lowercase() {
            'p' => PieceKind::Pawn,
            'n' => PieceKind::Knight,
            'b' => PieceKind::Bishop,
            'r' => PieceKind::Rook,
            'q' => PieceKind::Queen,
            'k' => PieceKind::King,
            _ => return None,
        };
        Some(Piece { kind, side, pos, just_castled: false })
    }

    fn fen_char(&self) -> char {
        let symbol = match self.kind {
            PieceKind::Pawn => 'p',
            PieceKind::Knight => 'n',
            PieceKind::Bishop => 'b',
            PieceKind::Rook => 'r',
            PieceKind::Queen => 'q',
            PieceKind::King => 'k',
        };
        match self.side {
            Side::White => symbol.to_ascii_uppercase(),
            Side::Black => symbol,
        }
    }

    /// Geometric and obstruction legality only. Assumes src and dest are in
    /// range and distinct. Capture rules (never onto a same-side piece) and
    /// king safety are the Board's concern, layered on top of this.
    fn is_valid_move(&self, src: Coordinate, dest: Coordinate, grid: &Grid) -> bool {
        match self.kind {
            PieceKind::Rook => {
                clear_vertical(src, dest, grid) || clear_horizontal(src, dest, grid)
            }
            PieceKind::Bishop => clear_diagonal(src, dest, grid),
            PieceKind::Queen => {
                clear_diagonal(src, dest, grid)
                    || clear_vertical(src, dest, grid)
                    || clear_horizontal(src, dest, grid)
            }
            PieceKind::Knight => is_knight_jump(src, dest),
            // One square in any direction. Castling is handled separately.
            PieceKind::King => {
                (dest.row - src.row).abs() <= 1 && (dest.col - src.col).abs() <= 1
            }
            PieceKind::Pawn => self.pawn_move_ok(src, dest, grid),
        }
    }

    fn pawn_move_ok(&self, src: Coordinate, dest: Coordinate, grid: &Grid) -> bool {
        // White advances toward row 0, Black toward row 7.
        let dir: i8 = match self.side {
            Side::White => -1,
            Side::Black => 1,
        };
        let dr = dest.row - src.row;
        let dc = dest.col - src.col;
        if dr == 0 || dr.signum() != dir {
            return false;
        }
        // A one-square diagonal step is a capture move only.
        if dr == dir && dc.abs() == 1 {
            return piece_on(grid, dest).is_some();
        }
        if dc != 0 {
            return false;
        }
        // Straight ahead never captures.
        if piece_on(grid, dest).is_some() {
            return false;
        }
        if dr == dir {
            return true;
        }
        // Two squares only from the starting rank, over an empty square.
        let start_row = match self.side {
            Side::White => 6,
            Side::Black => 1,
        };
        dr == 2 * dir
            && src.row == start_row
            && piece_on(grid, Coordinate::new(src.row + dir, src.col)).is_none()
    }
}

impl fmt::Display for Piece {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fen_char())
    }
}

// --- Ray Geometry ---

type Grid = [[Option<Piece>; 8]; 8];

fn piece_on(grid: &Grid, square: Coordinate) -> Option<Piece> {
    grid[square.row as usize][square.col as usize]
}

/// True iff src and dest share a row and every square strictly between them
/// is empty. The destination itself may be occupied (capture).
fn clear_horizontal(src: Coordinate, dest: Coordinate, grid: &Grid) -> bool {
    if src.row != dest.row || src.col == dest.col {
        return false;
    }
    let step = (dest.col - src.col).signum();
    let mut col = src.col + step;
    while col != dest.col {
        if grid[src.row as usize][col as usize].is_some() {
            return false;
        }
        col += step;
    }
    true
}

fn clear_vertical(src: Coordinate, dest: Coordinate, grid: &Grid) -> bool {
    if src.col != dest.col || src.row == dest.row {
        return false;
    }
    let step = (dest.row - src.row).signum();
    let mut row = src.row + step;
    while row != dest.row {
        if grid[row as usize][src.col as usize].is_some() {
            return false;
        }
        row += step;
    }
    true
}

fn clear_diagonal(src: Coordinate, dest: Coordinate, grid: &Grid) -> bool {
    if src == dest || (dest.row - src.row).abs() != (dest.col - src.col).abs() {
        return false;
    }
    let row_step = (dest.row - src.row).signum();
    let col_step = (dest.col - src.col).signum();
    let mut row = src.row + row_step;
    let mut col = src.col + col_step;
    while row != dest.row {
        if grid[row as usize][col as usize].is_some() {
            return false;
        }
        row += row_step;
        col += col_step;
    }
    true
}

/// The knight displacement test: exactly (1,2) or (2,1) in absolute terms.
fn is_knight_jump(src: Coordinate, dest: Coordinate) -> bool {
    let dr = (src.row - dest.row).abs();
    let dc = (src.col - dest.col).abs();
    (dr == 2 && dc == 1) || (dr == 1 && dc == 2)
}

// --- Castling Rights ---

/// Per-side, per-wing castling availability. Flags only ever transition
/// true to false: rights are lost when the king moves, when a rook leaves
/// its home file, or when a rook is captured on its home corner.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq)]
struct CastlingRights {
    white_kingside: bool,
    white_queenside: bool,
    black_kingside: bool,
    black_queenside: bool,
}

impl CastlingRights {
    fn none() -> Self {
        CastlingRights {
            white_kingside: false,
            white_queenside: false,
            black_kingside: false,
            black_queenside: false,
        }
    }

    fn from_fen_token(token: &str) -> Result<Self, FenError> {
        let mut rights = CastlingRights::none();
        if token == "-" {
            return Ok(rights);
        }
        for ch in token.chars() {
            match ch {
                'K' => rights.white_kingside = true,
                'Q' => rights.white_queenside = true,
                'k' => rights.black_kingside = true,
                'q' => rights.black_queenside = true,
                _ => return Err(FenError::BadCastlingToken(token.to_string())),
            }
        }
        Ok(rights)
    }

    /// Whether the given side may still castle toward the given king
    /// destination column.
    fn allows(&self, side: Side, dest_col: i8) -> bool {
        match (side, dest_col) {
            (Side::White, KINGSIDE_KING_COL) => self.white_kingside,
            (Side::White, QUEENSIDE_KING_COL) => self.white_queenside,
            (Side::Black, KINGSIDE_KING_COL) => self.black_kingside,
            (Side::Black, QUEENSIDE_KING_COL) => self.black_queenside,
            _ => false,
        }
    }

    fn king_moved(&mut self, side: Side) {
        match side {
            Side::White => {
                self.white_kingside = false;
                self.white_queenside = false;
            }
            Side::Black => {
                self.black_kingside = false;
                self.black_queenside = false;
            }
        }
    }

    /// Clears the flag for a rook leaving (or vanishing from) the given
    /// home column. Columns other than the two corners clear nothing.
    fn rook_gone(&mut self, side: Side, col: i8) {
        match (side, col) {
            (Side::White, KINGSIDE_ROOK_COL) => self.white_kingside = false,
            (Side::White, QUEENSIDE_ROOK_COL) => self.white_queenside = false,
            (Side::Black, KINGSIDE_ROOK_COL) => self.black_kingside = false,
            (Side::Black, QUEENSIDE_ROOK_COL) => self.black_queenside = false,
            _ => {}
        }
    }
}

impl fmt::Display for CastlingRights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut any = false;
        for (flag, ch) in [
            (self.white_kingside, 'K'),
            (self.white_queenside, 'Q'),
            (self.black_kingside, 'k'),
            (self.black_queenside, 'q'),
        ] {
            if flag {
                write!(f, "{}", ch)?;
                any = true;
            }
        }
        if !any {
            write!(f, "-")?;
        }
        Ok(())
    }
}

// --- Board ---

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum MoveKind {
    Standard,
    Castling,
}

/// What a committed move did, for the caller to report and log.
#[derive(Debug, Clone)]
struct MoveOutcome {
    piece: Piece,
    from: Coordinate,
    to: Coordinate,
    captured: Option<Piece>,
    castled: bool,
    status: GameStatus,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
struct Board {
    grid: Grid,
    side_to_move: Side,
    castling: CastlingRights,
    // King squares cached by Side::index; resynchronised on every king
    // relocation, castling rook side-effects included.
    king_pos: [Coordinate; 2],
}

impl Board {
    /// Builds a board from a position description: piece placement (rank
    /// 8 first, '/'-separated, digits for empty runs), active colour, and
    /// an optional castling token.
    fn load_fen(fen: &str) -> Result<Board, FenError> {
        let mut fields = fen.split_whitespace();
        let placement = fields.next().ok_or(FenError::MissingField("piece placement"))?;
        let active = fields.next().ok_or(FenError::MissingField("active colour"))?;
        // Truncated descriptions without a castling field load as no rights.
        let castling_token = fields.next().unwrap_or("-");

        let mut grid: Grid = [[None; 8]; 8];
        let mut kings: [Option<Coordinate>; 2] = [None, None];
        let mut row: i8 = 0;
        let mut col: i8 = 0;
        for ch in placement.chars() {
            match ch {
                '/' => {
                    row += 1;
                    col = 0;
                    if row > 7 {
                        return Err(FenError::BadPlacement("more than eight ranks".to_string()));
                    }
                }
                '1'..='8' => {
                    col += (ch as u8 - b'0') as i8;
                    if col > 8 {
                        return Err(FenError::BadPlacement(format!(
                            "empty run overflows rank {}",
                            8 - row
                        )));
                    }
                }
                _ => {
                    if col > 7 {
                        return Err(FenError::BadPlacement(format!(
                            "rank {} holds more than eight squares",
                            8 - row
                        )));
                    }
                    let square = Coordinate::new(row, col);
                    let piece = Piece::from_fen_char(square, ch).ok_or_else(|| {
                        FenError::BadPlacement(format!("unknown piece letter '{}'", ch))
                    })?;
                    if piece.kind == PieceKind::King {
                        kings[piece.side.index()] = Some(square);
                    }
                    grid[row as usize][col as usize] = Some(piece);
                    col += 1;
                }
            }
        }

        let side_to_move = match active {
            "w" => Side::White,
            "b" => Side::Black,
            other => return Err(FenError::BadSideToMove(other.to_string())),
        };
        let castling = CastlingRights::from_fen_token(castling_token)?;
        let king_pos = [
            kings[0].ok_or(FenError::MissingKing(Side::Black))?,
            kings[1].ok_or(FenError::MissingKing(Side::White))?,
        ];

        Ok(Board { grid, side_to_move, castling, king_pos })
    }

    fn piece_at(&self, square: Coordinate) -> Option<Piece> {
        piece_on(&self.grid, square)
    }

    fn square_mut(&mut self, square: Coordinate) -> &mut Option<Piece> {
        &mut self.grid[square.row as usize][square.col as usize]
    }

    fn king_square(&self, side: Side) -> Coordinate {
        self.king_pos[side.index()]
    }

    // --- Attack Analysis ---

    /// Returns a piece that could capture `target` on the next move, if one
    /// exists. Scans the eight rays (nearest occupied square per ray is the
    /// only candidate on it), then the knight offsets. For an occupied
    /// target the attacker is any opposing piece that reaches it; for an
    /// empty target it is a piece of `side_to_move` that could move there.
    /// `except` drops candidates of that kind entirely; the checkmate
    /// capture and block searches use it to keep kings out.
    fn attacker_of(
        &self,
        target: Coordinate,
        side_to_move: Side,
        except: Option<PieceKind>,
    ) -> Option<Piece> {
        for &(dr, dc) in RAY_DIRS.iter() {
            let mut square = target;
            while let Some(next) = square.offset(dr, dc) {
                square = next;
                if let Some(candidate) = self.piece_at(square) {
                    if self.can_check(candidate, target, side_to_move, except) {
                        return Some(candidate);
                    }
                    // Nearest occupied square settles this ray either way.
                    break;
                }
            }
        }
        for &(dr, dc) in KNIGHT_OFFSETS.iter() {
            if let Some(square) = target.offset(dr, dc) {
                if let Some(candidate) = self.piece_at(square) {
                    if candidate.kind == PieceKind::Knight
                        && self.can_check(candidate, target, side_to_move, except)
                    {
                        return Some(candidate);
                    }
                }
            }
        }
        None
    }

    /// Whether `candidate` qualifies as an attacker of `target` under the
    /// exclusion, side and geometry rules.
    fn can_check(
        &self,
        candidate: Piece,
        target: Coordinate,
        side_to_move: Side,
        except: Option<PieceKind>,
    ) -> bool {
        if except == Some(candidate.kind) {
            return false;
        }
        let side_ok = match self.piece_at(target) {
            Some(occupant) => candidate.side != occupant.side,
            None => candidate.side == side_to_move,
        };
        side_ok && candidate.is_valid_move(candidate.pos, target, &self.grid)
    }

    // --- Castling Sub-Protocol ---

    /// Checked only for kings whose plain move rule failed. Requires the
    /// wing's rights flag, an unattacked path from origin to destination
    /// inclusive, the rook still on its home corner, and an empty
    /// destination at the end of a clear horizontal run.
    fn castling_move_allowed(&self, king: Piece, src: Coordinate, dest: Coordinate) -> bool {
        if dest.row != src.row {
            return false;
        }
        let rook_col = match dest.col {
            KINGSIDE_KING_COL => KINGSIDE_ROOK_COL,
            QUEENSIDE_KING_COL => QUEENSIDE_ROOK_COL,
            _ => return false,
        };
        if !self.castling.allows(king.side, dest.col) {
            return false;
        }
        // The king may not castle out of, through, or into an attacked
        // square.
        if self.castling_path_attacked(king.side, src, dest) {
            return false;
        }
        match self.piece_at(Coordinate::new(src.row, rook_col)) {
            Some(p) if p.kind == PieceKind::Rook && p.side == king.side => {}
            _ => return false,
        }
        self.piece_at(dest).is_none() && clear_horizontal(src, dest, &self.grid)
    }

    fn castling_path_attacked(&self, side: Side, src: Coordinate, dest: Coordinate) -> bool {
        let step = if dest.col > src.col { 1 } else { -1 };
        let mut col = src.col;
        loop {
            let square = Coordinate::new(src.row, col);
            if self.attacker_of(square, side.opponent(), None).is_some() {
                return true;
            }
            if col == dest.col {
                break;
            }
            col += step;
        }
        false
    }

    // --- Move Application and Rollback ---

    /// Relocates the piece on `src` to `dest`, returning whatever stood on
    /// the destination. Keeps the piece's own position and the king cache
    /// in sync, and co-moves the castling rook when the king carries the
    /// just-castled flag. The rook relocation recurses with `flip_turn`
    /// false so the side to move changes exactly once per visible move.
    fn move_piece(&mut self, src: Coordinate, dest: Coordinate, flip_turn: bool) -> Option<Piece> {
        let mut piece = match self.square_mut(src).take() {
            Some(p) => p,
            None => return None,
        };
        piece.pos = dest;
        let captured = self.square_mut(dest).replace(piece);
        if piece.kind == PieceKind::King {
            self.king_pos[piece.side.index()] = dest;
            if piece.just_castled {
                if dest.col == KINGSIDE_KING_COL {
                    let _ = self.move_piece(
                        Coordinate::new(dest.row, dest.col + 1),
                        Coordinate::new(dest.row, dest.col - 1),
                        false,
                    );
                } else if dest.col == QUEENSIDE_KING_COL {
                    let _ = self.move_piece(
                        Coordinate::new(dest.row, dest.col - 1),
                        Coordinate::new(dest.row, dest.col + 1),
                        false,
                    );
                }
            }
        }
        if flip_turn {
            self.side_to_move = self.side_to_move.opponent();
        }
        captured
    }

    /// Exact inverse of `move_piece`: for any board,
    /// `undo_move(dest, src, move_piece(src, dest, f), f)` reproduces it,
    /// piece positions, king cache and side to move included. The legality
    /// probe leans on this round-trip for every candidate it tests.
    fn undo_move(
        &mut self,
        dest: Coordinate,
        src: Coordinate,
        captured: Option<Piece>,
        flip_turn: bool,
    ) {
        if let Some(mut piece) = self.square_mut(dest).take() {
            piece.pos = src;
            if piece.kind == PieceKind::King {
                self.king_pos[piece.side.index()] = src;
                if piece.just_castled {
                    // Same column discriminant as the forward direction.
                    if dest.col == KINGSIDE_KING_COL {
                        self.undo_move(
                            Coordinate::new(dest.row, dest.col - 1),
                            Coordinate::new(dest.row, dest.col + 1),
                            None,
                            false,
                        );
                    } else if dest.col == QUEENSIDE_KING_COL {
                        self.undo_move(
                            Coordinate::new(dest.row, dest.col + 1),
                            Coordinate::new(dest.row, dest.col - 1),
                            None,
                            false,
                        );
                    }
                }
            }
            *self.square_mut(src) = Some(piece);
        }
        if let Some(mut piece) = captured {
            piece.pos = dest;
            *self.square_mut(dest) = Some(piece);
        }
        if flip_turn {
            self.side_to_move = self.side_to_move.opponent();
        }
    }

    /// The pure legality predicate: applies the move speculatively, tests
    /// the mover's own king, and always rolls back. The board is identical
    /// before and after, whatever the verdict.
    fn try_valid_move(&mut self, src: Coordinate, dest: Coordinate) -> Option<MoveKind> {
        if src == dest {
            return None;
        }
        let piece = self.piece_at(src)?;
        if let Some(target) = self.piece_at(dest) {
            if target.side == piece.side {
                return None;
            }
        } else if piece.side != self.side_to_move {
            // A quiet move by the side without the move never comes up in
            // play; refusing it keeps the attack probes one-sided.
            return None;
        }

        let kind = if piece.is_valid_move(src, dest, &self.grid) {
            MoveKind::Standard
        } else if piece.kind == PieceKind::King && self.castling_move_allowed(piece, src, dest) {
            MoveKind::Castling
        } else {
            return None;
        };

        if kind == MoveKind::Castling {
            if let Some(king) = self.square_mut(src).as_mut() {
                king.just_castled = true;
            }
        }
        let captured = self.move_piece(src, dest, true);
        let exposed = self
            .attacker_of(self.king_square(piece.side), self.side_to_move, None)
            .is_some();
        self.undo_move(dest, src, captured, true);
        if kind == MoveKind::Castling {
            if let Some(king) = self.square_mut(src).as_mut() {
                king.just_castled = false;
            }
        }

        if exposed {
            None
        } else {
            Some(kind)
        }
    }

    fn update_castling_rights(&mut self, piece: Piece, dest: Coordinate) {
        match piece.kind {
            PieceKind::King => self.castling.king_moved(piece.side),
            PieceKind::Rook => self.castling.rook_gone(piece.side, piece.pos.col),
            _ => {}
        }
        // A rook captured on its home corner forfeits that wing as well.
        if let Some(victim) = self.piece_at(dest) {
            if victim.kind == PieceKind::Rook && victim.pos.row == victim.side.home_row() {
                self.castling.rook_gone(victim.side, victim.pos.col);
            }
        }
    }

    // --- Public Move Submission ---

    /// Validates and commits a move given as two textual squares. Every
    /// failure leaves the board untouched and reports which rule tripped.
    fn submit_move(&mut self, src: &str, dest: &str) -> Result<MoveOutcome, MoveError> {
        let src_sq = Coordinate::parse(src)
            .ok_or_else(|| MoveError::MalformedCoordinate(src.to_string()))?;
        let dest_sq = Coordinate::parse(dest)
            .ok_or_else(|| MoveError::MalformedCoordinate(dest.to_string()))?;
        let piece = self.piece_at(src_sq).ok_or(MoveError::EmptySource(src_sq))?;
        if piece.side != self.side_to_move {
            return Err(MoveError::WrongSideToMove(piece.side));
        }
        let kind = self
            .try_valid_move(src_sq, dest_sq)
            .ok_or(MoveError::IllegalMove { piece, dest: dest_sq })?;

        self.update_castling_rights(piece, dest_sq);
        if kind == MoveKind::Castling {
            if let Some(king) = self.square_mut(src_sq).as_mut() {
                king.just_castled = true;
            }
        }
        let captured = self.move_piece(src_sq, dest_sq, true);
        // The flag is transient; clear it as soon as the move is complete.
        if let Some(moved) = self.square_mut(dest_sq).as_mut() {
            moved.just_castled = false;
        }
        let status = self.evaluate_status();

        Ok(MoveOutcome {
            piece,
            from: src_sq,
            to: dest_sq,
            captured,
            castled: kind == MoveKind::Castling,
            status,
        })
    }

    // --- Game State Evaluation ---

    /// Derives the state of the game for the side now to move.
    fn evaluate_status(&mut self) -> GameStatus {
        let defender = self.side_to_move;
        let king_sq = self.king_square(defender);
        match self.attacker_of(king_sq, defender, None) {
            Some(checker) => {
                if self.is_checkmate(king_sq, checker) {
                    GameStatus::Checkmate
                } else {
                    GameStatus::Check
                }
            }
            None => {
                if self.has_any_valid_move(defender) {
                    GameStatus::Normal
                } else {
                    GameStatus::Stalemate
                }
            }
        }
    }

    /// Checkmate iff all three escapes fail: the king cannot step away, the
    /// checking piece cannot be captured, and (for sliding checkers) the
    /// check cannot be interposed.
    fn is_checkmate(&mut self, king_sq: Coordinate, checker: Piece) -> bool {
        if self.king_can_move(king_sq) {
            return false;
        }
        if self.can_take_attacker(checker) {
            return false;
        }
        // Knights jump; their checks cannot be blocked.
        if checker.kind != PieceKind::Knight && self.can_block_attacker(king_sq, checker) {
            return false;
        }
        true
    }

    fn king_can_move(&mut self, king_sq: Coordinate) -> bool {
        for dr in -1..=1i8 {
            for dc in -1..=1i8 {
                if dr == 0 && dc == 0 {
                    continue;
                }
                if let Some(dest) = king_sq.offset(dr, dc) {
                    if self.try_valid_move(king_sq, dest).is_some() {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Whether any defender can legally capture the checking piece. King
    /// escapes are `king_can_move`'s business, so kings are skipped.
    fn can_take_attacker(&mut self, checker: Piece) -> bool {
        for piece in self.pieces_of(self.side_to_move) {
            if piece.kind == PieceKind::King {
                continue;
            }
            if self.try_valid_move(piece.pos, checker.pos).is_some() {
                return true;
            }
        }
        false
    }

    /// Whether any defender can legally interpose on a square strictly
    /// between the king and a sliding checker.
    fn can_block_attacker(&mut self, king_sq: Coordinate, checker: Piece) -> bool {
        let from = checker.pos;
        let mut dr = 0i8;
        let mut dc = 0i8;
        if from.row == king_sq.row {
            dc = if from.col > king_sq.col { 1 } else { -1 };
        }
        if from.col == king_sq.col {
            dr = if from.row > king_sq.row { 1 } else { -1 };
        }
        if (from.row - king_sq.row).abs() == (from.col - king_sq.col).abs() {
            dr = if from.row > king_sq.row { 1 } else { -1 };
            dc = if from.col > king_sq.col { 1 } else { -1 };
        }
        if dr == 0 && dc == 0 {
            return false;
        }
        let defenders: Vec<Piece> = self
            .pieces_of(self.side_to_move)
            .into_iter()
            .filter(|p| p.kind != PieceKind::King)
            .collect();
        let mut square = king_sq;
        loop {
            square = match square.offset(dr, dc) {
                Some(s) => s,
                None => break,
            };
            if square == from {
                break;
            }
            for piece in &defenders {
                if self.try_valid_move(piece.pos, square).is_some() {
                    return true;
                }
            }
        }
        false
    }

    fn has_any_valid_move(&mut self, side: Side) -> bool {
        for piece in self.pieces_of(side) {
            for row in 0..8i8 {
                for col in 0..8i8 {
                    if self.try_valid_move(piece.pos, Coordinate::new(row, col)).is_some() {
                        return true;
                    }
                }
            }
        }
        false
    }

    fn pieces_of(&self, side: Side) -> Vec<Piece> {
        self.grid
            .iter()
            .flatten()
            .flatten()
            .filter(|p| p.side == side)
            .copied()
            .collect()
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  +-----------------+")?;
        for row in 0..8usize {
            write!(f, "{} | ", 8 - row)?;
            for col in 0..8usize {
                match self.grid[row][col] {
                    Some(piece) => write!(f, "{} ", piece)?,
                    None => write!(f, ". ")?,
                }
            }
            writeln!(f, "|")?;
        }
        writeln!(f, "  +-----------------+")?;
        writeln!(f, "    A B C D E F G H")?;
        writeln!(f, "Turn: {}", self.side_to_move)?;
        write!(f, "Castling: {}", self.castling)
    }
}

// --- Game Status ---

#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq)]
enum GameStatus {
    Normal,
    Check,
    Checkmate,
    Stalemate,
}

// --- Custom Error Types ---

#[derive(Debug)]
enum MoveError {
    MalformedCoordinate(String),
    EmptySource(Coordinate),
    WrongSideToMove(Side),
    IllegalMove { piece: Piece, dest: Coordinate },
}

impl fmt::Display for MoveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MoveError::MalformedCoordinate(text) => write!(
                f,
                "Invalid square reference '{}'. Use a file letter A-H and a rank digit 1-8.",
                text
            ),
            MoveError::EmptySource(square) => {
                write!(f, "There is no piece at position {}!", square)
            }
            MoveError::WrongSideToMove(side) => {
                write!(f, "It is not {}'s turn to move!", side)
            }
            MoveError::IllegalMove { piece, dest } => {
                write!(f, "{}'s {} cannot move to {}!", piece.side, piece.kind.name(), dest)
            }
        }
    }
}

impl Error for MoveError {}

#[derive(Debug)]
enum FenError {
    MissingField(&'static str),
    BadPlacement(String),
    BadSideToMove(String),
    BadCastlingToken(String),
    MissingKing(Side),
}

impl fmt::Display for FenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FenError::MissingField(field) => {
                write!(f, "Position description is missing the {} field.", field)
            }
            FenError::BadPlacement(reason) => write!(f, "Bad piece placement: {}.", reason),
            FenError::BadSideToMove(token) => {
                write!(f, "Bad active colour '{}': expected 'w' or 'b'.", token)
            }
            FenError::BadCastlingToken(token) => {
                write!(f, "Bad castling token '{}': expected '-' or a subset of KQkq.", token)
            }
            FenError::MissingKing(side) => write!(f, "The position has no {} king.", side),
        }
    }
}

impl Error for FenError {}

#[derive(Debug)]
enum SaveError {
    Serialization(serde_json::Error),
    Io(String, io::Error),
}

impl fmt::Display for SaveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveError::Serialization(e) => write!(f, "Serialization error: {}", e),
            SaveError::Io(file, e) => write!(f, "I/O error with file '{}': {}", file, e),
        }
    }
}

impl Error for SaveError {}

#[derive(Debug)]
enum CommandError {
    UnknownCommand(String),
    MissingArgument(&'static str),
    Save(SaveError),
    Fen(FenError),
    Io(io::Error),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::UnknownCommand(cmd) => {
                write!(f, "Unknown command: '{}'. Type 'help' for commands.", cmd)
            }
            CommandError::MissingArgument(usage) => {
                write!(f, "Missing argument: usage '{}'", usage)
            }
            CommandError::Save(e) => write!(f, "Log save error: {}", e),
            CommandError::Fen(e) => write!(f, "Position load error: {}", e),
            CommandError::Io(e) => write!(f, "Input/Output error: {}", e),
        }
    }
}

impl Error for CommandError {}

impl From<SaveError> for CommandError {
    fn from(e: SaveError) -> Self {
        CommandError::Save(e)
    }
}

impl From<FenError> for CommandError {
    fn from(e: FenError) -> Self {
        CommandError::Fen(e)
    }
}

impl From<io::Error> for CommandError {
    fn from(e: io::Error) -> Self {
        CommandError::Io(e)
    }
}

// --- Game Session and JSON Log ---

#[derive(Debug, Clone, Serialize)]
struct MoveRecord {
    notation: String,
    player: Side,
    captured: Option<PieceKind>,
    castled: bool,
    gave_check: bool,
    gave_checkmate: bool,
}

#[derive(Debug, Serialize)]
struct GameLog<'a> {
    result: Option<GameStatus>,
    moves: &'a [MoveRecord],
}

/// One interactive game: the board plus a move history and the pieces each
/// side has taken, for display and for the JSON log export.
struct Game {
    board: Board,
    history: Vec<MoveRecord>,
    captured_white: Vec<Piece>, // White pieces, taken by Black
    captured_black: Vec<Piece>, // Black pieces, taken by White
    finished: Option<GameStatus>,
}

impl Game {
    fn new() -> Result<Game, FenError> {
        Game::from_fen(START_POSITION)
    }

    fn from_fen(fen: &str) -> Result<Game, FenError> {
        Ok(Game {
            board: Board::load_fen(fen)?,
            history: Vec::new(),
            captured_white: Vec::new(),
            captured_black: Vec::new(),
            finished: None,
        })
    }

    fn submit_move(&mut self, src: &str, dest: &str) -> Result<MoveOutcome, MoveError> {
        let outcome = self.board.submit_move(src, dest)?;
        if let Some(captured) = outcome.captured {
            match captured.side {
                Side::White => self.captured_white.push(captured),
                Side::Black => self.captured_black.push(captured),
            }
        }
        let notation = if outcome.castled {
            if outcome.to.col == KINGSIDE_KING_COL {
                "O-O".to_string()
            } else {
                "O-O-O".to_string()
            }
        } else {
            format!("{}{}", outcome.from, outcome.to)
        };
        self.history.push(MoveRecord {
            notation,
            player: outcome.piece.side,
            captured: outcome.captured.map(|p| p.kind),
            castled: outcome.castled,
            gave_check: matches!(outcome.status, GameStatus::Check | GameStatus::Checkmate),
            gave_checkmate: outcome.status == GameStatus::Checkmate,
        });
        if matches!(outcome.status, GameStatus::Checkmate | GameStatus::Stalemate) {
            self.finished = Some(outcome.status);
        }
        Ok(outcome)
    }

    /// Writes the move history as pretty-printed JSON.
    fn save_log_to_file(&self, filename: &str) -> Result<(), SaveError> {
        let log = GameLog { result: self.finished, moves: &self.history };
        let json = serde_json::to_string_pretty(&log).map_err(SaveError::Serialization)?;
        fs::write(filename, json).map_err(|e| SaveError::Io(filename.to_string(), e))?;
        Ok(())
    }
}

impl fmt::Display for Game {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Captured by White: ")?;
        for piece in &self.captured_black {
            write!(f, "{} ", piece)?;
        }
        writeln!(f)?;
        write!(f, "Captured by Black: ")?;
        for piece in &self.captured_white {
            write!(f, "{} ", piece)?;
        }
        writeln!(f)?;
        writeln!(f, "---------------------")?;
        writeln!(f, "{}", self.board)?;
        if let Some(status) = self.finished {
            match status {
                GameStatus::Checkmate => write!(
                    f,
                    "\n=== GAME OVER: {} wins by checkmate. ===",
                    self.board.side_to_move.opponent()
                )?,
                GameStatus::Stalemate => write!(f, "\n=== GAME OVER: Draw by stalemate. ===")?,
                _ => {}
            }
        }
        Ok(())
    }
}

// --- Input Parsing ---

lazy_static! {
    // Two squares, optionally separated by whitespace or a dash: "e2e4",
    // "E2 E4", "E2-E4".
    static ref MOVE_RE: Regex =
        Regex::new(r"(?i)^\s*([a-h][1-8])\s*-?\s*([a-h][1-8])\s*$").unwrap();
}

#[derive(Debug)]
enum UserInput {
    Move(String, String),
    Command(Command),
}

#[derive(Debug)]
enum Command {
    NewGame,
    Load(String),
    History,
    SaveLog(String),
    Help,
    Quit,
}

fn parse_user_input(input: &str) -> Result<UserInput, CommandError> {
    let trimmed = input.trim();

    if let Some(caps) = MOVE_RE.captures(trimmed) {
        return Ok(UserInput::Move(caps[1].to_string(), caps[2].to_string()));
    }

    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let command_word = parts.next().unwrap_or("").to_lowercase();
    let argument = parts.next().unwrap_or("").trim();

    match command_word.as_str() {
        "new" => Ok(UserInput::Command(Command::NewGame)),
        "load" => {
            if argument.is_empty() {
                Err(CommandError::MissingArgument("load <fen>"))
            } else {
                Ok(UserInput::Command(Command::Load(argument.to_string())))
            }
        }
        "history" => Ok(UserInput::Command(Command::History)),
        "savelog" => {
            let filename = if argument.is_empty() { DEFAULT_LOG_FILENAME } else { argument };
            Ok(UserInput::Command(Command::SaveLog(filename.to_string())))
        }
        "help" | "?" => Ok(UserInput::Command(Command::Help)),
        "quit" | "exit" => Ok(UserInput::Command(Command::Quit)),
        _ => Err(CommandError::UnknownCommand(trimmed.to_string())),
    }
}

// --- Main Game Loop ---

fn announce(outcome: &MoveOutcome) {
    print!(
        "{}'s {} moves from {} to {}",
        outcome.piece.side,
        outcome.piece.kind.name(),
        outcome.from,
        outcome.to
    );
    if let Some(taken) = outcome.captured {
        print!(" taking {}'s {}", taken.side, taken.kind.name());
    }
    if outcome.castled {
        print!(" (castling)");
    }
    println!();

    let defender = outcome.piece.side.opponent();
    match outcome.status {
        GameStatus::Check => println!("{} is in check", defender),
        GameStatus::Checkmate => println!("{} is in checkmate", defender),
        GameStatus::Stalemate => println!("{} is in stalemate", defender),
        GameStatus::Normal => {}
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    println!("==============================");
    println!("|       Chess Arbiter        |");
    println!("==============================");
    let mut game = Game::new()?;
    print_help();

    'session: loop {
        println!("------------------------------------------");
        println!("{}", game);

        if game.finished.is_none() {
            print!(
                "\n{}'s turn. Enter move (e.g. E2 E4) or command: ",
                game.board.side_to_move
            );
        } else {
            print!("\nGame over. Enter 'new', 'load <fen>' or 'quit': ");
        }
        io::stdout().flush()?;

        let mut input_line = String::new();
        match io::stdin().read_line(&mut input_line) {
            Ok(0) => {
                println!("\nEnd of input detected. Quitting.");
                break 'session;
            }
            Ok(_) => {}
            Err(e) => {
                eprintln!("Error reading input: {}. Try again or use 'quit'.", e);
                continue 'session;
            }
        }

        let input_trimmed = input_line.trim();
        if input_trimmed.is_empty() {
            continue 'session;
        }

        match parse_user_input(input_trimmed) {
            Ok(UserInput::Move(src, dest)) => {
                if game.finished.is_some() {
                    println!("The game is over. Start a new one with 'new' or 'load <fen>'.");
                    continue 'session;
                }
                match game.submit_move(&src, &dest) {
                    Ok(outcome) => announce(&outcome),
                    Err(e) => println!("{}", e),
                }
            }
            Ok(UserInput::Command(command)) => match command {
                Command::NewGame => {
                    game = Game::new()?;
                    println!("A new game is started!");
                }
                Command::Load(fen) => match Game::from_fen(&fen) {
                    Ok(loaded) => {
                        game = loaded;
                        println!("A new board state is loaded!");
                    }
                    Err(e) => println!("Position load error: {}", e),
                },
                Command::History => {
                    if game.history.is_empty() {
                        println!("No moves played yet.");
                    } else {
                        for (i, record) in game.history.iter().enumerate() {
                            let annotation = if record.gave_checkmate {
                                "#"
                            } else if record.gave_check {
                                "+"
                            } else {
                                ""
                            };
                            println!(
                                "{:3}. {} {}{}",
                                i + 1,
                                record.player,
                                record.notation,
                                annotation
                            );
                        }
                    }
                }
                Command::SaveLog(filename) => match game.save_log_to_file(&filename) {
                    Ok(()) => println!("Game log saved to '{}'.", filename),
                    Err(e) => println!("Error saving game log: {}", e),
                },
                Command::Help => print_help(),
                Command::Quit => break 'session,
            },
            Err(e) => println!("Input Error: {}", e),
        }
    }

    println!("\nGame session finished.");
    Ok(())
}

/// Prints available commands.
fn print_help() {
    println!("\nAvailable Commands:");
    println!("  <move>         Two squares, e.g. 'E2 E4', 'e2e4' or 'E2-E4'.");
    println!("                 Castle by moving the king, e.g. 'E1 G1' or 'E1 B1'.");
    println!("  new            Start a fresh game from the standard position.");
    println!("  load <fen>     Load a position: placement, active colour, castling rights.");
    println!("  history        Show the moves played so far.");
    println!(
        "  savelog [file] Save the move history as JSON (default: {}).",
        DEFAULT_LOG_FILENAME
    );
    println!("  help           Show this help message.");
    println!("  quit / exit    Leave the session.");
    println!();
}

// --- Tests ---

#[cfg(test)]
mod tests {
    use super::*;

    fn board(fen: &str) -> Board {
        Board::load_fen(fen).expect("test position loads")
    }

    fn coord(text: &str) -> Coordinate {
        Coordinate::parse(text).expect("test coordinate parses")
    }

    // --- Coordinate ---

    #[test]
    fn coordinate_parse_maps_files_and_ranks() {
        assert_eq!(coord("A1"), Coordinate::new(7, 0));
        assert_eq!(coord("H8"), Coordinate::new(0, 7));
        assert_eq!(coord("E2"), Coordinate::new(6, 4));
        // Lowercase files are accepted.
        assert_eq!(coord("e2"), coord("E2"));
    }

    #[test]
    fn coordinate_parse_rejects_malformed_input() {
        for bad in ["", "A", "A9", "A0", "I1", "11", "AA", "A12", " A1"] {
            assert!(Coordinate::parse(bad).is_none(), "accepted '{}'", bad);
        }
    }

    #[test]
    fn coordinate_algebraic_round_trips() {
        for file in b'A'..=b'H' {
            for rank in b'1'..=b'8' {
                let text = format!("{}{}", file as char, rank as char);
                assert_eq!(coord(&text).algebraic(), text);
            }
        }
    }

    // --- Knight geometry ---

    #[test]
    fn knight_jump_accepts_all_eight_offsets() {
        let src = coord("D4");
        for &(dr, dc) in KNIGHT_OFFSETS.iter() {
            let dest = src.offset(dr, dc).expect("offset stays on board");
            assert!(is_knight_jump(src, dest), "rejected ({}, {})", dr, dc);
        }
    }

    #[test]
    fn knight_jump_rejects_non_l_offsets() {
        let src = coord("D4");
        for &(dr, dc) in &[(2, 2), (0, 1), (1, 1), (2, 0), (3, 1), (0, 2)] {
            let dest = src.offset(dr, dc).expect("offset stays on board");
            assert!(!is_knight_jump(src, dest), "accepted ({}, {})", dr, dc);
        }
    }

    // --- Sliding piece obstruction ---

    #[test]
    fn rook_path_must_be_clear() {
        let b = board("k7/8/8/8/R2p3r/8/8/7K w -");
        let rook = b.piece_at(coord("A4")).unwrap();
        // Capture of the nearest piece on the ray is fine.
        assert!(rook.is_valid_move(coord("A4"), coord("D4"), &b.grid));
        // Beyond it the path is obstructed.
        assert!(!rook.is_valid_move(coord("A4"), coord("H4"), &b.grid));
        assert!(rook.is_valid_move(coord("A4"), coord("A8"), &b.grid));
        // Not a rook line at all.
        assert!(!rook.is_valid_move(coord("A4"), coord("B5"), &b.grid));
    }

    #[test]
    fn bishop_path_must_be_clear() {
        let b = board("k7/8/8/3p4/8/1B6/8/7K w -");
        let bishop = b.piece_at(coord("B3")).unwrap();
        assert!(bishop.is_valid_move(coord("B3"), coord("D5"), &b.grid));
        assert!(!bishop.is_valid_move(coord("B3"), coord("F7"), &b.grid));
        assert!(!bishop.is_valid_move(coord("B3"), coord("B5"), &b.grid));
    }

    #[test]
    fn queen_moves_as_rook_or_bishop() {
        let b = board("k7/8/8/8/8/8/1Q6/7K w -");
        let queen = b.piece_at(coord("B2")).unwrap();
        assert!(queen.is_valid_move(coord("B2"), coord("B7"), &b.grid));
        assert!(queen.is_valid_move(coord("B2"), coord("G2"), &b.grid));
        assert!(queen.is_valid_move(coord("B2"), coord("F6"), &b.grid));
        assert!(!queen.is_valid_move(coord("B2"), coord("C4"), &b.grid));
    }

    // --- Pawn rules ---

    #[test]
    fn pawn_double_step_needs_both_squares_empty() {
        // Intermediate square occupied.
        let mut b = board("k7/8/8/8/8/P7/P7/K7 w -");
        assert!(b.try_valid_move(coord("A2"), coord("A4")).is_none());
        assert!(b.try_valid_move(coord("A2"), coord("A3")).is_none());

        // Only the destination occupied: still rejected, straight moves
        // never capture.
        let mut b = board("k7/8/8/8/p7/8/P7/K7 w -");
        assert!(b.try_valid_move(coord("A2"), coord("A4")).is_none());
        assert!(b.try_valid_move(coord("A2"), coord("A3")).is_some());
    }

    #[test]
    fn pawn_double_step_only_from_start_rank() {
        let mut b = board("k7/8/8/8/8/P7/8/K7 w -");
        assert!(b.try_valid_move(coord("A3"), coord("A5")).is_none());
        assert!(b.try_valid_move(coord("A3"), coord("A4")).is_some());
    }

    #[test]
    fn pawn_diagonal_step_is_capture_only() {
        let mut b = board("k7/8/8/8/8/1p6/P7/K7 w -");
        assert!(b.try_valid_move(coord("A2"), coord("B3")).is_some());

        let mut empty_diagonal = board("k7/8/8/8/8/8/P7/K7 w -");
        assert!(empty_diagonal.try_valid_move(coord("A2"), coord("B3")).is_none());
    }

    #[test]
    fn pawn_never_moves_backwards() {
        let mut b = board("k7/8/8/8/8/P7/8/7K w -");
        assert!(b.try_valid_move(coord("A3"), coord("A2")).is_none());
        let mut b = board("k7/8/p7/8/8/8/8/7K b -");
        assert!(b.try_valid_move(coord("A6"), coord("A7")).is_none());
    }

    // --- Turn handling and submission errors ---

    #[test]
    fn submission_enforces_turn_exclusivity() {
        let mut b = board(START_POSITION);
        let err = b.submit_move("E7", "E5").unwrap_err();
        assert!(matches!(err, MoveError::WrongSideToMove(Side::Black)));

        assert_eq!(b.side_to_move, Side::White);
        b.submit_move("E2", "E4").expect("opening move is legal");
        assert_eq!(b.side_to_move, Side::Black);

        // White piece again, now out of turn.
        let err = b.submit_move("E4", "E5").unwrap_err();
        assert!(matches!(err, MoveError::WrongSideToMove(Side::White)));
    }

    #[test]
    fn submission_reports_distinct_failures() {
        let mut b = board(START_POSITION);
        let before = b.clone();

        assert!(matches!(
            b.submit_move("Z9", "E4").unwrap_err(),
            MoveError::MalformedCoordinate(_)
        ));
        assert!(matches!(
            b.submit_move("E2", "E44").unwrap_err(),
            MoveError::MalformedCoordinate(_)
        ));
        assert!(matches!(
            b.submit_move("E3", "E4").unwrap_err(),
            MoveError::EmptySource(_)
        ));
        assert!(matches!(
            b.submit_move("E2", "E5").unwrap_err(),
            MoveError::IllegalMove { .. }
        ));

        // None of the rejections touched the board.
        assert_eq!(b, before);
    }

    // --- Commit/rollback round-trip ---

    #[test]
    fn move_undo_round_trip_restores_board() {
        let mut b = board("r3k2r/8/8/8/8/8/8/R3K2R w KQkq");
        let before = b.clone();

        let captured = b.move_piece(coord("A1"), coord("A8"), true);
        assert_eq!(captured.map(|p| p.kind), Some(PieceKind::Rook));
        b.undo_move(coord("A8"), coord("A1"), captured, true);
        assert_eq!(b, before);

        let captured = b.move_piece(coord("E1"), coord("E2"), true);
        assert!(captured.is_none());
        b.undo_move(coord("E2"), coord("E1"), captured, true);
        assert_eq!(b, before);
    }

    #[test]
    fn legality_probe_leaves_board_untouched() {
        let mut b = board("r3k2r/8/8/8/8/8/8/R3K2R w KQkq");
        let before = b.clone();
        // A castling probe exercises the recursive rook move and the
        // transient king flag.
        assert!(b.try_valid_move(coord("E1"), coord("G1")).is_some());
        assert_eq!(b, before);
        // A rejected probe as well.
        assert!(b.try_valid_move(coord("A1"), coord("B2")).is_none());
        assert_eq!(b, before);
    }

    // --- No-self-check invariant ---

    #[test]
    fn pinned_piece_may_not_expose_its_king() {
        // Black rook on E8 pins the bishop on E2 against the white king.
        let mut b = board("4r2k/8/8/8/8/8/4B3/4K3 w -");
        let before = b.clone();
        assert!(b.try_valid_move(coord("E2"), coord("D3")).is_none());
        assert!(b.try_valid_move(coord("E2"), coord("F3")).is_none());
        assert_eq!(b, before);
    }

    #[test]
    fn king_may_not_step_into_an_attacked_square() {
        let mut b = board("4r2k/8/8/8/8/8/8/3K4 w -");
        // E1 and E2 are covered by the rook on E8.
        assert!(b.try_valid_move(coord("D1"), coord("E1")).is_none());
        assert!(b.try_valid_move(coord("D1"), coord("E2")).is_none());
        assert!(b.try_valid_move(coord("D1"), coord("C1")).is_some());
    }

    // --- Attack analysis ---

    #[test]
    fn attacker_found_along_open_ray_only() {
        let b = board("4r2k/8/8/8/4P3/8/8/4K3 w -");
        // The white pawn on E4 blocks the rook's file.
        assert!(b.attacker_of(coord("E1"), Side::White, None).is_none());

        let open = board("4r2k/8/8/8/8/8/8/4K3 w -");
        let attacker = open.attacker_of(coord("E1"), Side::White, None).unwrap();
        assert_eq!(attacker.kind, PieceKind::Rook);
        assert_eq!(attacker.pos, coord("E8"));
    }

    #[test]
    fn knight_attacks_are_detected_separately() {
        let b = board("k7/8/8/8/8/5n2/8/6K1 w -");
        let attacker = b.attacker_of(coord("G1"), Side::White, None).unwrap();
        assert_eq!(attacker.kind, PieceKind::Knight);
    }

    #[test]
    fn except_kind_is_dropped_from_candidates() {
        let b = board("k7/8/8/8/8/8/8/K7 w -");
        // The white king could move onto B2; excluding kings hides it.
        assert!(b.attacker_of(coord("B2"), Side::White, None).is_some());
        assert!(b
            .attacker_of(coord("B2"), Side::White, Some(PieceKind::King))
            .is_none());
    }

    // --- Castling ---

    #[test]
    fn kingside_castling_moves_king_and_rook() {
        let mut b = board("r3k2r/8/8/8/8/8/8/R3K2R w KQkq");
        let outcome = b.submit_move("E1", "G1").expect("kingside castling is legal");
        assert!(outcome.castled);
        assert_eq!(outcome.status, GameStatus::Normal);

        assert_eq!(b.piece_at(coord("G1")).map(|p| p.kind), Some(PieceKind::King));
        assert_eq!(b.piece_at(coord("F1")).map(|p| p.kind), Some(PieceKind::Rook));
        assert!(b.piece_at(coord("E1")).is_none());
        assert!(b.piece_at(coord("H1")).is_none());
        assert_eq!(b.king_square(Side::White), coord("G1"));
        // The transient flag does not outlive the move.
        assert!(!b.piece_at(coord("G1")).unwrap().just_castled);

        // White's rights are gone, Black's stand.
        assert!(!b.castling.white_kingside);
        assert!(!b.castling.white_queenside);
        assert!(b.castling.black_kingside);
        assert!(b.castling.black_queenside);
        assert_eq!(b.side_to_move, Side::Black);
    }

    #[test]
    fn queenside_castling_lands_on_the_b_file() {
        // This engine's queenside castle puts the king on column 1 with the
        // rook tucked beside it on column 2.
        let mut b = board("r3k2r/8/8/8/8/8/8/R3K2R w KQkq");
        let outcome = b.submit_move("E1", "B1").expect("queenside castling is legal");
        assert!(outcome.castled);
        assert_eq!(b.piece_at(coord("B1")).map(|p| p.kind), Some(PieceKind::King));
        assert_eq!(b.piece_at(coord("C1")).map(|p| p.kind), Some(PieceKind::Rook));
        assert!(b.piece_at(coord("A1")).is_none());
        assert!(b.piece_at(coord("E1")).is_none());

        // Black may still castle afterwards.
        let outcome = b.submit_move("E8", "G8").expect("black kingside castling is legal");
        assert!(outcome.castled);
        assert_eq!(b.piece_at(coord("F8")).map(|p| p.kind), Some(PieceKind::Rook));
    }

    #[test]
    fn castling_rejected_through_an_attacked_square() {
        // The black rook on F8 covers F1, the kingside transit square.
        let mut b = board("r3kr2/8/8/8/8/8/8/R3K2R w KQkq");
        assert!(matches!(
            b.submit_move("E1", "G1").unwrap_err(),
            MoveError::IllegalMove { .. }
        ));
        // The queenside path is unaffected.
        assert!(b.submit_move("E1", "B1").is_ok());
    }

    #[test]
    fn castling_rejected_while_in_check() {
        let mut b = board("r3k2r/8/8/8/4R3/8/8/4K3 b kq");
        assert!(matches!(
            b.submit_move("E8", "G8").unwrap_err(),
            MoveError::IllegalMove { .. }
        ));
    }

    #[test]
    fn castling_rejected_with_pieces_between() {
        let mut b = board("r3k2r/8/8/8/8/8/8/RN2K2R w KQkq");
        // The knight on B1 blocks the queenside run.
        assert!(b.submit_move("E1", "B1").is_err());
        assert!(b.submit_move("E1", "G1").is_ok());
    }

    #[test]
    fn castling_rights_never_come_back() {
        let mut b = board("r3k2r/8/8/8/8/8/8/R3K2R w KQkq");
        b.submit_move("A1", "A3").expect("rook lift is legal");
        b.submit_move("H8", "H6").expect("black rook lift is legal");
        b.submit_move("A3", "A1").expect("rook returns home");
        b.submit_move("H6", "H8").expect("black rook returns home");

        // Returning the rook does not restore the right.
        assert!(!b.castling.white_queenside);
        assert!(matches!(
            b.submit_move("E1", "B1").unwrap_err(),
            MoveError::IllegalMove { .. }
        ));
        // The untouched wing still works.
        assert!(b.submit_move("E1", "G1").is_ok());
    }

    #[test]
    fn capturing_a_home_rook_clears_that_wing() {
        // The knight on B8 screens the rank, so the capture on A8 does not
        // also give check.
        let mut b = board("rn2k2r/8/8/8/8/8/8/R3K2R w KQkq");
        b.submit_move("A1", "A8").expect("rook takes rook");
        assert!(!b.castling.black_queenside);
        // The capturing rook left its own home corner too.
        assert!(!b.castling.white_queenside);
        assert!(b.castling.black_kingside);
        assert!(b.submit_move("E8", "G8").is_ok());
    }

    // --- Check, checkmate, stalemate ---

    #[test]
    fn back_rank_mate_is_checkmate() {
        // White king boxed in by its own pawns, black rook owns the rank.
        let mut b = board("6k1/5ppp/8/8/8/8/5PPP/r5K1 w -");
        assert_eq!(b.evaluate_status(), GameStatus::Checkmate);
    }

    #[test]
    fn check_with_capture_available_is_not_mate() {
        // The rook on A2 can take the checking rook on A1.
        let mut b = board("6k1/5ppp/8/8/8/8/R4PPP/r5K1 w -");
        assert_eq!(b.evaluate_status(), GameStatus::Check);
    }

    #[test]
    fn check_with_block_available_is_not_mate() {
        // The rook on B2 can interpose on B1.
        let mut b = board("6k1/5ppp/8/8/8/8/1R3PPP/r5K1 w -");
        assert_eq!(b.evaluate_status(), GameStatus::Check);
    }

    #[test]
    fn knight_check_cannot_be_blocked() {
        // Smothered corner: nothing can take the knight on F2 and
        // interposition is impossible against a knight.
        let mut b = board("6k1/8/8/8/8/8/5nPP/6RK w -");
        assert_eq!(b.evaluate_status(), GameStatus::Checkmate);
    }

    #[test]
    fn knight_check_with_flight_square_is_check() {
        let mut b = board("6k1/8/8/8/8/5n2/5PPP/6K1 w -");
        assert_eq!(b.evaluate_status(), GameStatus::Check);
    }

    #[test]
    fn stalemate_when_no_move_and_no_check() {
        let mut b = board("K7/8/8/8/8/8/P4Q2/7k b -");
        assert_eq!(b.evaluate_status(), GameStatus::Stalemate);
    }

    #[test]
    fn open_position_is_normal() {
        let mut b = board(START_POSITION);
        assert_eq!(b.evaluate_status(), GameStatus::Normal);
    }

    #[test]
    fn fools_mate_ends_the_game() {
        let mut b = board(START_POSITION);
        b.submit_move("F2", "F3").expect("legal");
        b.submit_move("E7", "E5").expect("legal");
        b.submit_move("G2", "G4").expect("legal");
        let outcome = b.submit_move("D8", "H4").expect("legal");
        assert_eq!(outcome.status, GameStatus::Checkmate);
    }

    // --- FEN loading ---

    #[test]
    fn load_fen_start_position() {
        let b = board(START_POSITION);
        assert_eq!(b.side_to_move, Side::White);
        assert_eq!(b.piece_at(coord("E1")).map(|p| p.kind), Some(PieceKind::King));
        assert_eq!(b.piece_at(coord("D8")).map(|p| p.kind), Some(PieceKind::Queen));
        assert_eq!(b.king_square(Side::White), coord("E1"));
        assert_eq!(b.king_square(Side::Black), coord("E8"));
        assert!(b.castling.white_kingside && b.castling.black_queenside);
        assert!(b.piece_at(coord("E4")).is_none());
    }

    #[test]
    fn load_fen_rejects_bad_descriptions() {
        assert!(matches!(
            Board::load_fen("8/8/8/8/8/8/8/8 w -"),
            Err(FenError::MissingKing(_))
        ));
        assert!(matches!(
            Board::load_fen("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR x KQkq"),
            Err(FenError::BadSideToMove(_))
        ));
        assert!(matches!(
            Board::load_fen("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KXkq"),
            Err(FenError::BadCastlingToken(_))
        ));
        assert!(matches!(
            Board::load_fen("rnbqkbnz/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq"),
            Err(FenError::BadPlacement(_))
        ));
        assert!(matches!(
            Board::load_fen("rnbqkbnrr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq"),
            Err(FenError::BadPlacement(_))
        ));
        assert!(matches!(Board::load_fen(""), Err(FenError::MissingField(_))));
        assert!(matches!(
            Board::load_fen("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR"),
            Err(FenError::MissingField(_))
        ));
    }

    #[test]
    fn load_fen_without_castling_token_means_no_rights() {
        let mut b = board("r3k2r/8/8/8/8/8/8/R3K2R w");
        assert_eq!(b.castling, CastlingRights::none());
        assert!(matches!(
            b.submit_move("E1", "G1").unwrap_err(),
            MoveError::IllegalMove { .. }
        ));
    }

    // --- Session history and log ---

    #[test]
    fn game_records_moves_and_captures() {
        let mut game = Game::from_fen(START_POSITION).expect("start position loads");
        game.submit_move("E2", "E4").expect("legal");
        game.submit_move("D7", "D5").expect("legal");
        game.submit_move("E4", "D5").expect("pawn takes pawn");

        assert_eq!(game.history.len(), 3);
        assert_eq!(game.history[0].notation, "E2E4");
        assert_eq!(game.history[2].captured, Some(PieceKind::Pawn));
        assert_eq!(game.captured_black.len(), 1);
        assert!(game.finished.is_none());
    }

    #[test]
    fn castling_is_logged_with_its_own_notation() {
        let mut game = Game::from_fen("r3k2r/8/8/8/8/8/8/R3K2R w KQkq").expect("loads");
        game.submit_move("E1", "G1").expect("legal");
        assert_eq!(game.history[0].notation, "O-O");
        assert!(game.history[0].castled);
    }

    #[test]
    fn game_log_serializes() {
        let mut game = Game::from_fen(START_POSITION).expect("start position loads");
        game.submit_move("E2", "E4").expect("legal");
        let log = GameLog { result: game.finished, moves: &game.history };
        let json = serde_json::to_string(&log).expect("log serializes");
        assert!(json.contains("E2E4"));
    }

    // --- Input parsing ---

    #[test]
    fn move_input_accepts_common_spellings() {
        for input in ["E2 E4", "e2e4", "E2-E4", "  e2  e4  "] {
            match parse_user_input(input) {
                Ok(UserInput::Move(src, dest)) => {
                    assert_eq!(coord(&src), coord("E2"));
                    assert_eq!(coord(&dest), coord("E4"));
                }
                other => panic!("'{}' parsed as {:?}", input, other),
            }
        }
    }

    #[test]
    fn commands_parse_and_unknown_input_errors() {
        assert!(matches!(
            parse_user_input("load r3k2r/8/8/8/8/8/8/R3K2R w KQkq"),
            Ok(UserInput::Command(Command::Load(_)))
        ));
        assert!(matches!(parse_user_input("quit"), Ok(UserInput::Command(Command::Quit))));
        assert!(matches!(
            parse_user_input("savelog"),
            Ok(UserInput::Command(Command::SaveLog(f))) if f == DEFAULT_LOG_FILENAME
        ));
        assert!(matches!(parse_user_input("load"), Err(CommandError::MissingArgument(_))));
        assert!(matches!(parse_user_input("E2 E9"), Err(CommandError::UnknownCommand(_))));
        assert!(matches!(parse_user_input("castle"), Err(CommandError::UnknownCommand(_))));
    }
}
