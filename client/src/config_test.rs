#![allow(clippy::float_cmp)]

use super::*;

fn parse(args: &[&str]) -> Cli {
    Cli::try_parse_from(std::iter::once("sticky").chain(args.iter().copied())).expect("args should parse")
}

fn view(cli: Cli) -> ViewArgs {
    match cli.command {
        Command::View(args) => args,
        other => panic!("expected view, got {other:?}"),
    }
}

#[test]
fn view_defaults() {
    let cli = parse(&["view"]);
    assert_eq!(cli.backend.mode, Mode::Auto);
    assert_eq!(cli.backend.server_url, "http://127.0.0.1:3000");
    assert_eq!(cli.backend.connect_timeout_ms, 3_000);

    let args = view(cli);
    assert_eq!(args.bots, 0);
    assert_eq!(args.fps, 60);
    assert_eq!((args.width, args.height), (1280.0, 800.0));
    assert_eq!(args.motion.to_config(), MotionConfig::default());
}

#[test]
fn view_flags_override_defaults() {
    let cli = parse(&[
        "--mode", "local", "--data-dir", "/tmp/board", "view", "--bots", "5", "--pan", "right", "--friction", "0.9",
    ]);
    assert_eq!(cli.backend.mode, Mode::Local);
    assert_eq!(cli.backend.data_dir, Some(PathBuf::from("/tmp/board")));

    let args = view(cli);
    assert_eq!(args.bots, 5);
    assert_eq!(args.pan, Some(PanDirection::Right));
    let motion = args.motion.to_config();
    assert_eq!(motion.friction, 0.9);
    assert_eq!(motion.key_pan_speed, KEY_PAN_SPEED);
}

#[test]
fn backend_flags_are_accepted_after_the_subcommand() {
    let cli = parse(&["ping", "--mode", "live", "--server-url", "http://board:8080"]);
    assert!(matches!(cli.command, Command::Ping));
    assert_eq!(cli.backend.mode, Mode::Live);
    assert_eq!(cli.backend.server_url, "http://board:8080");
}

#[test]
fn note_accepts_named_colors_and_negative_positions() {
    let cli = parse(&["note", "--text", "hi", "--color", "pink", "--x", "-10", "--y", "5"]);
    let Command::Note(note) = cli.command else { panic!("expected note") };
    assert_eq!(note.color, NoteColor::Pink);
    assert_eq!((note.x, note.y), (Some(-10.0), Some(5.0)));
}

#[test]
fn note_position_needs_both_axes() {
    let err = Cli::try_parse_from(["sticky", "note", "--text", "hi", "--x", "1"]).expect_err("y missing");
    assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
}

#[test]
fn chunk_key_may_be_negative() {
    let cli = parse(&["chunk", "stamps", "-1_2"]);
    let Command::Chunk { namespace, key } = cli.command else { panic!("expected chunk") };
    assert_eq!((namespace.as_str(), key.as_str()), ("stamps", "-1_2"));
}

#[test]
fn options_keep_or_generate_participant() {
    let cli = parse(&["--participant", "alice", "ping"]);
    assert_eq!(cli.backend.options().participant, "alice");
    assert_eq!(cli.backend.options().connect_timeout, Duration::from_secs(3));

    let generated = parse(&["ping"]).backend.options().participant;
    assert!(generated.starts_with("viewer-"));
    assert_eq!(generated.len(), "viewer-".len() + 8);
}

#[test]
fn frame_interval_follows_fps() {
    let mut args = view(parse(&["view", "--fps", "50"]));
    assert_eq!(args.frame_interval(), Duration::from_millis(20));
    args.fps = 0;
    assert_eq!(args.frame_interval(), Duration::from_secs(1));
}
