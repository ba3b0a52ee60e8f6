use std::{cell::RefCell, fs, rc::Rc};

use image::{DynamicImage, GenericImageView};
use sd2_rs_core::{
    run, Error, Invocation, PipelineProvider, Result, StepProgress, TextToImagePipeline,
    DEFAULT_OUTPUT, MODEL_ID,
};

type Calls = Rc<RefCell<Vec<String>>>;

#[derive(Default)]
struct Failures {
    scheduler: bool,
    pipeline: bool,
    device: bool,
    generate: bool,
}

/// Records every call in order and returns a tiny solid image.
struct MockProvider {
    calls: Calls,
    steps: usize,
    fail: Failures,
}

impl MockProvider {
    fn new(steps: usize) -> Self {
        Self {
            calls: Calls::default(),
            steps,
            fail: Failures::default(),
        }
    }

    fn failing(fail: Failures) -> Self {
        Self {
            fail,
            ..Self::new(2)
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

struct MockScheduler;

struct MockPipeline {
    calls: Calls,
    steps: usize,
    fail_device: bool,
    fail_generate: bool,
}

impl PipelineProvider for MockProvider {
    type Scheduler = MockScheduler;
    type Pipeline = MockPipeline;

    fn load_scheduler(&self, model_id: &str) -> Result<MockScheduler> {
        self.calls
            .borrow_mut()
            .push(format!("load_scheduler {model_id}"));
        if self.fail.scheduler {
            return Err(Error::ModelLoad {
                model_id: model_id.to_string(),
                cause: anyhow::anyhow!("no network"),
            });
        }
        Ok(MockScheduler)
    }

    fn load_pipeline(&self, model_id: &str, _scheduler: MockScheduler) -> Result<MockPipeline> {
        self.calls
            .borrow_mut()
            .push(format!("load_pipeline {model_id}"));
        if self.fail.pipeline {
            return Err(Error::ModelLoad {
                model_id: model_id.to_string(),
                cause: anyhow::anyhow!("corrupted weights"),
            });
        }
        Ok(MockPipeline {
            calls: self.calls.clone(),
            steps: self.steps,
            fail_device: self.fail.device,
            fail_generate: self.fail.generate,
        })
    }
}

impl TextToImagePipeline for MockPipeline {
    fn place_on_device(self, device: &str) -> Result<Self> {
        self.calls.borrow_mut().push(format!("place {device}"));
        if self.fail_device {
            return Err(Error::Device {
                device: device.to_string(),
                cause: anyhow::anyhow!("unknown device"),
            });
        }
        Ok(self)
    }

    fn generate(
        &mut self,
        prompt: &str,
        mut on_step: Option<&mut dyn FnMut(StepProgress)>,
    ) -> Result<DynamicImage> {
        self.calls.borrow_mut().push(format!("generate {prompt}"));
        if self.fail_generate {
            return Err(Error::Generation(anyhow::anyhow!("out of memory")));
        }
        for step in 0..self.steps {
            if let Some(callback) = on_step.as_deref_mut() {
                callback(StepProgress {
                    step,
                    total: self.steps,
                });
            }
        }
        Ok(DynamicImage::new_rgb8(8, 8))
    }
}

#[test]
fn literal_prompt_runs_every_stage_once() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("output.png");
    let provider = MockProvider::new(3);
    let invocation = Invocation::new("a red cube", "cpu").with_output(&output);

    let written = run(MODEL_ID, &invocation, &provider, None)?;

    assert_eq!(written, output);
    assert_eq!(
        provider.calls(),
        vec![
            format!("load_scheduler {MODEL_ID}"),
            format!("load_pipeline {MODEL_ID}"),
            "place cpu".to_string(),
            "generate a red cube".to_string(),
        ]
    );
    assert_eq!(image::open(&output)?.dimensions(), (8, 8));
    Ok(())
}

#[test]
fn output_defaults_to_output_png() {
    let invocation = Invocation::new("a red cube", "cpu");
    assert_eq!(invocation.output, std::path::PathBuf::from(DEFAULT_OUTPUT));
    assert_eq!(DEFAULT_OUTPUT, "output.png");
}

#[test]
fn prompt_file_contents_are_the_prompt() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let prompt = dir.path().join("prompt.txt");
    fs::write(&prompt, "a blue sphere")?;
    let output = dir.path().join("out.png");
    let provider = MockProvider::new(1);
    let invocation =
        Invocation::new(prompt.display().to_string(), "cpu").with_output(&output);

    run(MODEL_ID, &invocation, &provider, None)?;

    assert!(provider
        .calls()
        .contains(&"generate a blue sphere".to_string()));
    assert!(output.is_file());
    Ok(())
}

#[test]
fn progress_is_reported_once_per_step() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let provider = MockProvider::new(4);
    let invocation = Invocation::new("a red cube", "cpu").with_output(dir.path().join("a.png"));

    let mut seen = Vec::new();
    let mut record = |progress: StepProgress| seen.push((progress.step, progress.total));
    run(MODEL_ID, &invocation, &provider, Some(&mut record))?;

    assert_eq!(seen, vec![(0, 4), (1, 4), (2, 4), (3, 4)]);
    Ok(())
}

#[test]
fn existing_output_is_overwritten() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("output.png");
    fs::write(&output, b"stale")?;
    let provider = MockProvider::new(1);
    let invocation = Invocation::new("a red cube", "cpu").with_output(&output);

    run(MODEL_ID, &invocation, &provider, None)?;

    assert_eq!(image::open(&output)?.dimensions(), (8, 8));
    Ok(())
}

#[test]
fn unreadable_prompt_fails_before_loading() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let provider = MockProvider::new(1);
    // A directory exists but cannot be read as a prompt.
    let invocation = Invocation::new(dir.path().display().to_string(), "cpu")
        .with_output(dir.path().join("output.png"));

    let result = run(MODEL_ID, &invocation, &provider, None);

    assert!(matches!(result, Err(Error::FileAccess { .. })));
    assert!(provider.calls().is_empty());
    Ok(())
}

#[test]
fn empty_prompt_fails_before_loading() {
    let provider = MockProvider::new(1);
    let invocation = Invocation::new("", "cpu");

    let result = run(MODEL_ID, &invocation, &provider, None);

    assert!(matches!(result, Err(Error::Argument(_))));
    assert!(provider.calls().is_empty());
}

#[test]
fn failures_stop_the_run() -> anyhow::Result<()> {
    let cases = [
        (
            Failures {
                scheduler: true,
                ..Default::default()
            },
            1,
        ),
        (
            Failures {
                pipeline: true,
                ..Default::default()
            },
            2,
        ),
        (
            Failures {
                device: true,
                ..Default::default()
            },
            3,
        ),
        (
            Failures {
                generate: true,
                ..Default::default()
            },
            4,
        ),
    ];

    for (fail, calls_made) in cases {
        let dir = tempfile::tempdir()?;
        let output = dir.path().join("output.png");
        let provider = MockProvider::failing(fail);
        let invocation = Invocation::new("a red cube", "tpu").with_output(&output);

        let result = run(MODEL_ID, &invocation, &provider, None);

        match calls_made {
            1 | 2 => assert!(matches!(result, Err(Error::ModelLoad { .. }))),
            3 => assert!(matches!(result, Err(Error::Device { .. }))),
            _ => assert!(matches!(result, Err(Error::Generation(_)))),
        }
        assert_eq!(provider.calls().len(), calls_made);
        assert!(!output.exists());
    }
    Ok(())
}

#[test]
fn unwritable_output_is_an_io_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let provider = MockProvider::new(1);
    let invocation = Invocation::new("a red cube", "cpu")
        .with_output(dir.path().join("missing-dir").join("output.png"));

    let result = run(MODEL_ID, &invocation, &provider, None);

    assert!(matches!(result, Err(Error::Io { .. })));
    Ok(())
}
