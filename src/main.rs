use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, MouseButton, MouseEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::{error, info, warn};
use rand::{seq::SliceRandom, Rng};
use ratatui::{prelude::*, widgets::*};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use simplelog::{Config, LevelFilter, WriteLogger};
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const HIGH_SCORE_FILE: &str = ".slither_high_score.txt";
const MUSIC_FILE: &str = "assets/background.mp3";
const FOOD_SOUND_FILE: &str = "assets/food.mp3";
const HIT_SOUND_FILE: &str = "assets/hit.wav";

const FOOD_REWARD: u32 = 10;
const INITIAL_SPEED: u32 = 10;
const SPEED_STEP: u32 = 1;

fn main() -> Result<(), io::Error> {
    // Set up logging before anything else
    WriteLogger::init(
        LevelFilter::Info,
        Config::default(),
        File::create("slither.log")?,
    )
    .expect("Failed to initialize logger");

    info!("Starting Slither");

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // The playfield is fixed at startup: the terminal area minus the title
    // bar (3 rows) and the playfield borders. One terminal cell is one grid
    // cell.
    let size = terminal.size()?;
    let arena = Arena {
        width: i32::from(size.width.saturating_sub(2).max(1)),
        height: i32::from(size.height.saturating_sub(5).max(1)),
        cell: 1,
    };

    let mut game = Game::new(arena);

    // Run game loop; the tick interval shrinks as the snake speeds up
    let mut last_tick = Instant::now();
    loop {
        terminal.draw(|f| game.render(f))?;

        let timeout = game.tick_interval().saturating_sub(last_tick.elapsed());
        if event::poll(timeout)? {
            match event::read()? {
                Event::Key(key) => game.handle_key(key),
                Event::Mouse(mouse) => game.handle_mouse(mouse),
                _ => {}
            }
        }

        if last_tick.elapsed() >= game.tick_interval() {
            game.update();
            last_tick = Instant::now();
        }

        if game.exit {
            break;
        }
    }

    // Cleanup terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    Ok(())
}

/// Fixed rectangular bound of the playfield. All positions are integer
/// multiples of `cell` within it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Arena {
    width: i32,
    height: i32,
    cell: i32,
}

impl Arena {
    fn cols(&self) -> i32 {
        self.width / self.cell
    }

    fn rows(&self) -> i32 {
        self.height / self.cell
    }

    fn contains(&self, pos: Pos) -> bool {
        pos.x >= 0 && pos.x < self.width && pos.y >= 0 && pos.y < self.height
    }

    fn center(&self) -> Pos {
        Pos {
            x: self.cols() / 2 * self.cell,
            y: self.rows() / 2 * self.cell,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    fn opposite(&self) -> Direction {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }

    fn delta(&self, cell: i32) -> (i32, i32) {
        match self {
            Direction::Up => (0, -cell),
            Direction::Down => (0, cell),
            Direction::Left => (-cell, 0),
            Direction::Right => (cell, 0),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Pos {
    x: i32,
    y: i32,
}

impl Pos {
    fn step(&self, dir: Direction, cell: i32) -> Pos {
        let (dx, dy) = dir.delta(cell);
        Pos {
            x: self.x + dx,
            y: self.y + dy,
        }
    }

    /// Chebyshev-style proximity: reached when both axis deltas are smaller
    /// than one cell. Coincides with equality on an aligned grid but also
    /// handles a head that runs off the food's grid.
    fn reaches(&self, other: Pos, cell: i32) -> bool {
        (self.x - other.x).abs() < cell && (self.y - other.y).abs() < cell
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GameOverCause {
    HitWall,
    HitSelf,
    /// The snake covers every cell and food can no longer be placed.
    BoardFull,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Playing,
    GameOver(GameOverCause),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TickOutcome {
    /// Normal movement, tail removed
    Shifted,
    /// Ate food, grew by one
    Ate,
    /// Transitioned to game over
    Lost(GameOverCause),
    /// Tick while already game over, nothing happened
    Idle,
}

/// The whole game state and its update rules. Randomness is passed in so
/// tests can drive it with a seeded generator.
#[derive(Debug)]
struct Engine {
    arena: Arena,
    snake: VecDeque<Pos>,
    direction: Direction,
    food: Option<Pos>,
    score: u32,
    speed: u32,
    phase: Phase,
}

impl Engine {
    fn new(arena: Arena, rng: &mut impl Rng) -> Self {
        let mut engine = Engine {
            arena,
            snake: VecDeque::new(),
            direction: Direction::Down,
            food: None,
            score: 0,
            speed: INITIAL_SPEED,
            phase: Phase::Playing,
        };
        engine.restart(rng);
        engine
    }

    /// The snake is never empty
    fn head(&self) -> Pos {
        self.snake[0]
    }

    fn occupied(&self, pos: Pos) -> bool {
        self.snake.contains(&pos)
    }

    /// Replaces the current direction unless the request would reverse the
    /// snake onto its own neck.
    fn set_direction(&mut self, requested: Direction) {
        if requested.opposite() != self.direction {
            self.direction = requested;
        }
    }

    /// Picks a food cell uniformly from the cells the snake does not occupy.
    /// `None` when the snake covers the whole board.
    fn place_food(&self, rng: &mut impl Rng) -> Option<Pos> {
        let (cols, rows, cell) = (self.arena.cols(), self.arena.rows(), self.arena.cell);
        let free: Vec<Pos> = (0..rows)
            .flat_map(|r| {
                (0..cols).map(move |c| Pos {
                    x: c * cell,
                    y: r * cell,
                })
            })
            .filter(|pos| !self.occupied(*pos))
            .collect();
        free.choose(rng).copied()
    }

    /// Advances the game by one step. Exactly one of loss, growth or shift
    /// happens per call.
    fn tick(&mut self, rng: &mut impl Rng) -> TickOutcome {
        if !matches!(self.phase, Phase::Playing) {
            return TickOutcome::Idle;
        }

        let new_head = self.head().step(self.direction, self.arena.cell);

        if !self.arena.contains(new_head) {
            self.phase = Phase::GameOver(GameOverCause::HitWall);
            return TickOutcome::Lost(GameOverCause::HitWall);
        }
        if self.occupied(new_head) {
            self.phase = Phase::GameOver(GameOverCause::HitSelf);
            return TickOutcome::Lost(GameOverCause::HitSelf);
        }

        self.snake.push_front(new_head);

        match self.food {
            Some(food) if new_head.reaches(food, self.arena.cell) => {
                self.score += FOOD_REWARD;
                self.speed += SPEED_STEP;
                self.food = self.place_food(rng);
                if self.food.is_none() {
                    self.phase = Phase::GameOver(GameOverCause::BoardFull);
                    return TickOutcome::Lost(GameOverCause::BoardFull);
                }
                TickOutcome::Ate
            }
            _ => {
                self.snake.pop_back();
                TickOutcome::Shifted
            }
        }
    }

    /// Back to the initial state: one center segment heading down, initial
    /// speed, zero score, fresh food.
    fn restart(&mut self, rng: &mut impl Rng) {
        self.snake.clear();
        self.snake.push_front(self.arena.center());
        self.direction = Direction::Down;
        self.speed = INITIAL_SPEED;
        self.score = 0;
        self.phase = Phase::Playing;
        self.food = self.place_food(rng);
        if self.food.is_none() {
            // Degenerate board with no free cell besides the snake
            self.phase = Phase::GameOver(GameOverCause::BoardFull);
        }
    }
}

/// Maps a press/release pair to a direction by its dominant displacement
/// axis. `None` for a zero-displacement pair, which is a tap.
fn swipe_direction(start: (u16, u16), end: (u16, u16)) -> Option<Direction> {
    let dx = i32::from(end.0) - i32::from(start.0);
    // Terminal cells are roughly twice as tall as wide; weight rows to match
    let dy = (i32::from(end.1) - i32::from(start.1)) * 2;

    if dx == 0 && dy == 0 {
        return None;
    }

    if dx.abs() > dy.abs() {
        Some(if dx > 0 {
            Direction::Right
        } else {
            Direction::Left
        })
    } else {
        Some(if dy > 0 { Direction::Down } else { Direction::Up })
    }
}

fn load_high_score(path: &Path) -> u32 {
    match fs::read_to_string(path) {
        Ok(contents) => contents.trim().parse().unwrap_or(0),
        Err(e) => {
            info!("No saved high score ({})", e);
            0
        }
    }
}

fn save_high_score(path: &Path, score: u32) {
    if let Err(e) = fs::write(path, score.to_string()) {
        error!("Error saving high score: {}", e);
    }
}

/// Optional audio: a looping background track plus one-shot cues. Any
/// missing device or asset downgrades to silence without touching the game.
struct SoundBank {
    _stream: Option<OutputStream>,
    handle: Option<OutputStreamHandle>,
    music: Option<Sink>,
}

impl SoundBank {
    fn new() -> Self {
        let (stream, handle) = match OutputStream::try_default() {
            Ok(pair) => pair,
            Err(e) => {
                warn!("Audio unavailable: {}", e);
                return SoundBank {
                    _stream: None,
                    handle: None,
                    music: None,
                };
            }
        };

        for cue in [FOOD_SOUND_FILE, HIT_SOUND_FILE] {
            if !Path::new(cue).exists() {
                warn!("No sound cue at {}", cue);
            }
        }

        let music = Self::load_music(&handle);

        SoundBank {
            _stream: Some(stream),
            handle: Some(handle),
            music,
        }
    }

    fn load_music(handle: &OutputStreamHandle) -> Option<Sink> {
        let file = match File::open(MUSIC_FILE) {
            Ok(file) => file,
            Err(_) => {
                warn!("No background music at {}", MUSIC_FILE);
                return None;
            }
        };

        let source = match Decoder::new_looped(BufReader::new(file)) {
            Ok(source) => source,
            Err(e) => {
                error!("Failed to decode {}: {}", MUSIC_FILE, e);
                return None;
            }
        };

        match Sink::try_new(handle) {
            Ok(sink) => {
                sink.set_volume(0.04);
                sink.append(source);
                Some(sink)
            }
            Err(e) => {
                error!("Failed to open music sink: {}", e);
                None
            }
        }
    }

    fn music_play(&self) {
        if let Some(sink) = &self.music {
            sink.play();
        }
    }

    fn music_pause(&self) {
        if let Some(sink) = &self.music {
            sink.pause();
        }
    }

    fn one_shot(&self, path: &str) {
        let Some(handle) = &self.handle else { return };

        // Missing asset means the cue is disabled, not an error
        let file = match File::open(path) {
            Ok(file) => file,
            Err(_) => return,
        };

        match Decoder::new(BufReader::new(file)) {
            Ok(source) => {
                if let Err(e) = handle.play_raw(source.convert_samples()) {
                    error!("Failed to play {}: {}", path, e);
                }
            }
            Err(e) => error!("Failed to decode {}: {}", path, e),
        }
    }
}

struct Game {
    engine: Engine,
    rng: rand::rngs::ThreadRng,
    high_score: u32,
    high_score_path: PathBuf,
    sounds: SoundBank,
    swipe_start: Option<(u16, u16)>,
    restart_button: Option<Rect>,
    exit: bool,
}

impl Game {
    fn new(arena: Arena) -> Self {
        let mut rng = rand::thread_rng();
        let engine = Engine::new(arena, &mut rng);
        let high_score_path = PathBuf::from(HIGH_SCORE_FILE);

        Game {
            engine,
            rng,
            high_score: load_high_score(&high_score_path),
            high_score_path,
            sounds: SoundBank::new(),
            swipe_start: None,
            restart_button: None,
            exit: false,
        }
    }

    fn tick_interval(&self) -> Duration {
        Duration::from_millis((1000 / u64::from(self.engine.speed.max(1))).max(1))
    }

    fn handle_key(&mut self, key: event::KeyEvent) {
        use event::KeyCode;

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => self.exit = true,
            KeyCode::Up | KeyCode::Char('w') => self.steer(Direction::Up),
            KeyCode::Down | KeyCode::Char('s') => self.steer(Direction::Down),
            KeyCode::Left | KeyCode::Char('a') => self.steer(Direction::Left),
            KeyCode::Right | KeyCode::Char('d') => self.steer(Direction::Right),
            _ => {}
        }
    }

    fn handle_mouse(&mut self, mouse: event::MouseEvent) {
        match mouse.kind {
            MouseEventKind::Down(MouseButton::Left) => {
                self.swipe_start = Some((mouse.column, mouse.row));
            }
            MouseEventKind::Up(MouseButton::Left) => {
                let Some(start) = self.swipe_start.take() else {
                    return;
                };
                let end = (mouse.column, mouse.row);
                match swipe_direction(start, end) {
                    Some(dir) => self.steer(dir),
                    None => self.tap(end),
                }
            }
            _ => {}
        }
    }

    fn steer(&mut self, dir: Direction) {
        if matches!(self.engine.phase, Phase::Playing) {
            self.engine.set_direction(dir);
        }
    }

    fn tap(&mut self, at: (u16, u16)) {
        if !matches!(self.engine.phase, Phase::GameOver(_)) {
            return;
        }
        if let Some(button) = self.restart_button {
            if button.contains(Position::new(at.0, at.1)) {
                self.restart();
            }
        }
    }

    fn restart(&mut self) {
        info!("Restarting game");
        self.engine.restart(&mut self.rng);
        self.sounds.music_play();
    }

    fn update(&mut self) {
        match self.engine.tick(&mut self.rng) {
            TickOutcome::Ate => self.sounds.one_shot(FOOD_SOUND_FILE),
            TickOutcome::Lost(cause) => self.on_game_over(cause),
            TickOutcome::Shifted | TickOutcome::Idle => {}
        }
    }

    fn on_game_over(&mut self, cause: GameOverCause) {
        info!("Game over ({:?}) with score {}", cause, self.engine.score);
        self.sounds.music_pause();
        self.sounds.one_shot(HIT_SOUND_FILE);

        if self.engine.score > self.high_score {
            self.high_score = self.engine.score;
            save_high_score(&self.high_score_path, self.high_score);
            info!("New high score: {}", self.high_score);
        }
    }

    fn render(&mut self, frame: &mut Frame) {
        let layout = Layout::default()
            .direction(layout::Direction::Vertical)
            .constraints([
                Constraint::Length(3), // Title + scores
                Constraint::Min(0),    // Playfield
            ])
            .split(frame.area());

        let title = format!(
            "SLITHER    Best: {}    Score: {}",
            self.high_score, self.engine.score
        );
        frame.render_widget(
            Paragraph::new(title)
                .alignment(Alignment::Left)
                .block(Block::default().borders(Borders::ALL)),
            layout[0],
        );

        let block = Block::default().borders(Borders::ALL);
        let field = block.inner(layout[1]);
        frame.render_widget(block, layout[1]);
        frame.render_widget(&self.engine, field);

        match self.engine.phase {
            Phase::Playing => {
                self.restart_button = None;
            }
            Phase::GameOver(cause) => {
                let banner = match cause {
                    GameOverCause::BoardFull => "YOU WIN",
                    _ => "GAME OVER",
                };
                let banner_area = Rect {
                    x: field.x,
                    y: field.y + field.height / 3,
                    width: field.width,
                    height: 2.min(field.height),
                };
                frame.render_widget(
                    Paragraph::new(format!(
                        "{}\nScore: {}    Best: {}",
                        banner, self.engine.score, self.high_score
                    ))
                    .alignment(Alignment::Center),
                    banner_area,
                );

                // Fixed-position restart control; a tap inside it restarts
                let width = 13.min(field.width);
                let height = 3.min(field.height);
                let button = Rect {
                    x: field.x + (field.width - width) / 2,
                    y: (banner_area.y + 3).min(field.bottom().saturating_sub(height)),
                    width,
                    height,
                };
                frame.render_widget(
                    Paragraph::new("RESTART")
                        .alignment(Alignment::Center)
                        .block(Block::default().borders(Borders::ALL)),
                    button,
                );
                self.restart_button = Some(button);
            }
        }
    }
}

impl Widget for &Engine {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let cell = self.arena.cell;
        let to_screen = |pos: Pos| -> Option<(u16, u16)> {
            let col = area.x + (pos.x / cell) as u16;
            let row = area.y + (pos.y / cell) as u16;
            (col < area.right() && row < area.bottom()).then_some((col, row))
        };

        for (i, pos) in self.snake.iter().enumerate() {
            if let Some((col, row)) = to_screen(*pos) {
                let color = if i == 0 { Color::Yellow } else { Color::Green };
                buf[(col, row)].set_symbol(" ").set_bg(color);
            }
        }

        if let Some(food) = self.food {
            if let Some((col, row)) = to_screen(food) {
                buf[(col, row)].set_symbol("●").set_fg(Color::Red);
            }
        }
    }
}
