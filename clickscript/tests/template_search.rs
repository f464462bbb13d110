use image::{imageops, GrayImage, Luma};

use clickscript::config::Configuration;
use clickscript::sink::RecordingSink;
use clickscript::{
    Action, ClickButton, ClickTarget, Command, Engine, EngineError, ErrorCategory, ErrorPolicy, InputAction,
    Inverted, Locate, Region, Screen, Script, SearchError, SearchPolicy, StopSignal, TemplateDir,
    TemplateSearch, TerminateReason,
};

const TEMPLATE: &str = "button.png";

/// Static desktop picture; regions outside it are clipped.
struct Desktop(GrayImage);

impl Screen for Desktop {
    fn capture_region(&self, x: i32, y: i32, width: u32, height: u32) -> Result<Region, SearchError> {
        let left = x.clamp(0, self.0.width() as i32);
        let top = y.clamp(0, self.0.height() as i32);
        let right = (x + width as i32).clamp(0, self.0.width() as i32);
        let bottom = (y + height as i32).clamp(0, self.0.height() as i32);
        let crop = imageops::crop_imm(
            &self.0,
            left as u32,
            top as u32,
            (right - left) as u32,
            (bottom - top) as u32,
        );
        Ok(Region::new(crop.to_image(), left, top))
    }

    fn capture_screen(&self) -> Result<GrayImage, SearchError> {
        Ok(self.0.clone())
    }
}

fn noise(x: u32, y: u32) -> u8 {
    let h = x.wrapping_mul(73_856_093) ^ y.wrapping_mul(19_349_663);
    (h.wrapping_mul(2_654_435_761) >> 24) as u8
}

/// A textured desktop with the 20x20 "button" drawn at `top_left`.
fn desktop(button: &GrayImage, top_left: (u32, u32)) -> GrayImage {
    let mut image = GrayImage::from_fn(220, 160, |x, y| Luma([noise(x + 1000, y + 1000)]));
    imageops::replace(&mut image, button, i64::from(top_left.0), i64::from(top_left.1));
    image
}

fn button() -> GrayImage {
    GrayImage::from_fn(20, 20, |x, y| Luma([noise(x, y)]))
}

fn fixture(top_left: (u32, u32)) -> (tempfile::TempDir, TemplateSearch<Desktop, TemplateDir>) {
    let dir = tempfile::tempdir().unwrap();
    let templates = TemplateDir::new(dir.path());
    let button = button();
    templates.save(TEMPLATE, &button).unwrap();
    let search = TemplateSearch::new(Desktop(desktop(&button, top_left)), templates);
    (dir, search)
}

fn single_attempt() -> SearchPolicy {
    SearchPolicy {
        retry_count: 1,
        ..SearchPolicy::default()
    }
}

#[test]
fn test_element_at_recorded_position_is_confirmed() {
    let (_dir, search) = fixture((120, 40));
    let found = search
        .locate(Some(TEMPLATE), (130, 50), &single_attempt(), &StopSignal::new())
        .unwrap();
    assert_eq!(found, (130, 50));
}

#[test]
fn test_moved_element_is_found_on_full_screen() {
    let (_dir, search) = fixture((150, 110));
    let found = search
        .locate(Some(TEMPLATE), (30, 30), &single_attempt(), &StopSignal::new())
        .unwrap();
    assert_eq!(found, (160, 120));
}

#[test]
fn test_local_only_search_reports_not_found() {
    let (_dir, search) = fixture((150, 110));
    let policy = SearchPolicy {
        full_screen: false,
        ..single_attempt()
    };
    let err = search
        .locate(Some(TEMPLATE), (30, 30), &policy, &StopSignal::new())
        .unwrap_err();
    assert!(matches!(err, SearchError::ElementNotFound(_)));
}

#[test]
fn test_missing_template_file() {
    let (_dir, search) = fixture((120, 40));
    let err = search
        .locate(Some("gone.png"), (130, 50), &single_attempt(), &StopSignal::new())
        .unwrap_err();
    assert_eq!(err, SearchError::TemplateMissing("gone.png".into()));
}

#[test]
fn test_inverted_search() {
    let (_dir, search) = fixture((120, 40));
    let stop = StopSignal::new();
    let policy = SearchPolicy {
        full_screen: false,
        ..single_attempt()
    };
    let inverted = Inverted(&search);

    let present = inverted.locate(Some(TEMPLATE), (130, 50), &policy, &stop);
    assert!(matches!(present, Err(SearchError::ElementPresent(_))));

    let absent = inverted.locate(Some(TEMPLATE), (30, 130), &policy, &stop);
    assert_eq!(absent, Ok((30, 130)));
}

#[test]
fn test_stopped_search_is_cancelled() {
    let (_dir, search) = fixture((150, 110));
    let stop = StopSignal::new();
    stop.stop();
    let err = search
        .locate(Some(TEMPLATE), (30, 30), &single_attempt(), &stop)
        .unwrap_err();
    assert_eq!(err, SearchError::Cancelled);
}

#[test]
fn test_engine_clicks_where_element_moved() {
    let (_dir, search) = fixture((150, 110));
    let mut config = Configuration::immediate();
    config.search.retry_count = 1;
    let sink = RecordingSink::new();
    let script = Script::new(
        "moved",
        vec![Command::new(Action::Click(
            ClickButton::Double,
            ClickTarget::at(30, 30).with_template(TEMPLATE),
        ))],
    )
    .unwrap();
    let mut engine = Engine::new(script, config)
        .with_sink(sink.clone())
        .with_locator(search);

    let report = engine.run().unwrap();
    assert_eq!(report.reason, TerminateReason::Finished);
    assert_eq!(
        sink.actions(),
        vec![InputAction::Click {
            button: ClickButton::Double,
            at: (160, 120)
        }]
    );
}

/// A desktop whose screenshots always fail.
struct BrokenScreen;

impl Screen for BrokenScreen {
    fn capture_region(&self, _x: i32, _y: i32, _width: u32, _height: u32) -> Result<Region, SearchError> {
        Err(SearchError::Capture("no display".into()))
    }

    fn capture_screen(&self) -> Result<GrayImage, SearchError> {
        Err(SearchError::Capture("no display".into()))
    }
}

#[test]
fn test_broken_screen_ends_run_even_when_ignoring_missing_elements() {
    let dir = tempfile::tempdir().unwrap();
    let templates = TemplateDir::new(dir.path());
    templates.save(TEMPLATE, &button()).unwrap();
    let mut config = Configuration::immediate();
    config.search.retry_count = 1;
    config.policies.set(ErrorCategory::ElementNotFound, ErrorPolicy::Ignore);
    let sink = RecordingSink::new();
    let script = Script::new(
        "broken",
        vec![
            Command::new(Action::Click(
                ClickButton::Left,
                ClickTarget::at(5, 5).with_template(TEMPLATE),
            )),
            Command::new(Action::KeyDown("a".into())),
        ],
    )
    .unwrap();
    let mut engine = Engine::new(script, config)
        .with_sink(sink.clone())
        .with_locator(TemplateSearch::new(BrokenScreen, templates));

    let err = engine.run().unwrap_err();
    assert_eq!(
        err,
        EngineError::Capture {
            index: 0,
            message: "no display".into()
        }
    );
    assert!(sink.actions().is_empty());
}
