mod common;

use fontgoggles::{
    opener::open_font, CancelToken, Direction, FeatureValue, Features, FontKind, FontState,
    Project, Tag, TextInfo, VariationLocation,
};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn ufo_ligatures_follow_features() {
    let dir = tempfile::tempdir().unwrap();
    let ufo = common::write_liga_ufo(dir.path());
    let ctx = common::context();
    let (font, bytes) = open_font(&ctx, &ufo, 0, None, &CancelToken::new())
        .await
        .unwrap();
    assert!(bytes.is_none());
    assert_eq!(font.kind(), FontKind::Ufo);
    assert!(font.features(Tag::new(b"GSUB")).unwrap().contains(&Tag::new(b"liga")));

    let text = TextInfo::new("fierce");
    let run = font
        .glyph_run_from_text_info(&text, &Features::new(), None)
        .unwrap();
    assert_eq!(run.names(), vec!["f_i", "e", "r", "c", "e"]);
    assert_eq!(run.end_pos, (520.0 + 500.0 + 350.0 + 450.0 + 500.0, 0.0));

    let no_liga = Features::from([(Tag::new(b"liga"), FeatureValue::Bool(false))]);
    let run = font.glyph_run_from_text_info(&text, &no_liga, None).unwrap();
    assert_eq!(run.names(), vec!["f", "i", "e", "r", "c", "e"]);
    let clusters: Vec<u32> = run.iter().map(|g| g.cluster).collect();
    assert_eq!(clusters, vec![0, 1, 2, 3, 4, 5]);

    // Outlines come from the UFO
    let bounds = font.draw_glyph("f_i", false).unwrap().bounds().unwrap();
    assert_eq!(bounds.x1, 520.0);
    assert!(font.draw_glyph(".notdef", false).unwrap().bounds().is_some());

    ctx.pool().shutdown().await;
}

#[tokio::test]
async fn designspace_follows_location() {
    let dir = tempfile::tempdir().unwrap();
    let path = common::write_designspace(dir.path());
    let ctx = common::context();
    let (mut font, _) = open_font(&ctx, &path, 0, None, &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(font.kind(), FontKind::Designspace);

    let wght = Tag::new(b"wght");
    let axis = &font.axes()[&wght];
    assert_eq!((axis.min, axis.default, axis.max), (100.0, 100.0, 900.0));
    assert_eq!(
        font.instances(),
        &[("Medium".to_string(), VariationLocation::from([(wght, 500.0)]))]
    );
    assert_eq!(font.external_files().len(), 2);

    let text = TextInfo::new("A");
    let run = font
        .glyph_run_from_text_info(&text, &Features::new(), None)
        .unwrap();
    assert_eq!(run.end_pos, (400.0, 0.0));

    let medium = VariationLocation::from([(wght, 500.0)]);
    assert!(font.set_variation_location(&medium));
    assert!(!font.set_variation_location(&medium));
    let run = font
        .glyph_run_from_text_info(&text, &Features::new(), None)
        .unwrap();
    assert_eq!(run.end_pos, (600.0, 0.0));
    let bounds = font.draw_glyph("A", false).unwrap().bounds().unwrap();
    assert!((bounds.x1 - 600.0).abs() < 1e-6);

    ctx.pool().shutdown().await;
}

#[tokio::test]
async fn project_loads_sources_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let ufo = common::write_liga_ufo(dir.path());
    let broken = dir.path().join("Broken.ufo");
    std::fs::create_dir_all(&broken).unwrap();
    let ctx = common::context();

    let mut project = Project::new();
    project.add_font(&ufo, 0);
    project.add_font(&broken, 0);
    project.load_fonts(&ctx, &CancelToken::new()).await.unwrap();

    assert!(project.entries()[0].is_loaded());
    assert!(matches!(project.entries()[1].state(), FontState::Failed(_)));
    assert_eq!(ctx.pool().num_busy(), 0);
    assert!(ctx.pool().num_workers() <= 5);

    ctx.pool().shutdown().await;
}

#[tokio::test]
async fn vertical_layout_uses_glyph_metrics() {
    let dir = tempfile::tempdir().unwrap();
    let ufo = common::write_mixed_ufo(dir.path());
    let ctx = common::context();
    let (font, _) = open_font(&ctx, &ufo, 0, None, &CancelToken::new())
        .await
        .unwrap();

    let text = TextInfo::new("AB").with_direction(Some(Direction::Ttb));
    let run = font
        .glyph_run_from_text_info(&text, &Features::new(), None)
        .unwrap();
    assert!(run.vertical);
    assert_eq!(run.names(), vec!["A", "B"]);
    let metrics: Vec<(f64, f64, f64, f64)> = run.iter().map(|g| (g.ax, g.ay, g.dx, g.dy)).collect();
    // B has no vertical metrics of its own: the em height and the ascender
    assert_eq!(
        metrics,
        vec![(0.0, -900.0, -300.0, -820.0), (0.0, -1000.0, -250.0, -750.0)]
    );
    assert_eq!(run.glyphs()[1].pos, (-250.0, -1650.0));
    assert_eq!(run.end_pos, (0.0, -1900.0));

    ctx.pool().shutdown().await;
}

#[tokio::test]
async fn right_to_left_runs_keep_source_clusters() {
    let dir = tempfile::tempdir().unwrap();
    let ufo = common::write_mixed_ufo(dir.path());
    let ctx = common::context();
    let (font, _) = open_font(&ctx, &ufo, 0, None, &CancelToken::new())
        .await
        .unwrap();

    let text = TextInfo::new("ab\u{05D0}\u{05D1}");
    assert_eq!(text.to_bidi(), &[0, 1, 3, 2]);
    let run = font
        .glyph_run_from_text_info(&text, &Features::new(), None)
        .unwrap();
    assert_eq!(run.names(), vec!["a", "b", "bet", "alef"]);
    let clusters: Vec<u32> = run.iter().map(|g| g.cluster).collect();
    assert_eq!(clusters, vec![0, 1, 3, 2]);
    assert_eq!(run.end_pos, (450.0 + 460.0 + 530.0 + 550.0, 0.0));
    assert_eq!(run.map_chars_to_glyphs([2]).into_iter().collect::<Vec<_>>(), vec![3]);

    ctx.pool().shutdown().await;
}

#[tokio::test]
async fn paragraphs_are_shaped_separately() {
    let dir = tempfile::tempdir().unwrap();
    let ufo = common::write_mixed_ufo(dir.path());
    let ctx = common::context();
    let (font, _) = open_font(&ctx, &ufo, 0, None, &CancelToken::new())
        .await
        .unwrap();

    let text = TextInfo::new("\u{05D0}\u{05D1}\nab");
    assert_eq!(text.char_count(), 5);
    assert_eq!(text.to_bidi().len(), 5);
    assert_eq!(text.from_bidi().len(), 5);
    assert_eq!(text.base_level(), 1);
    let run = font
        .glyph_run_from_text_info(&text, &Features::new(), None)
        .unwrap();
    assert_eq!(run.num_chars, 5);
    // The line break has no glyph of its own in this font
    let named: Vec<(&str, u32)> = run
        .iter()
        .filter(|g| g.name != ".notdef")
        .map(|g| (g.name.as_str(), g.cluster))
        .collect();
    assert_eq!(named, vec![("bet", 1), ("alef", 0), ("a", 3), ("b", 4)]);

    ctx.pool().shutdown().await;
}
