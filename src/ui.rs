use iocraft::prelude::*;
use tokio::sync::watch;

use crate::orchestrator::UploadProgress;
use crate::policy::{ByteRange, MEGABYTE, UploadStrategy};
use crate::submission::SubmittedFile;

fn human_size(bytes: u64) -> String {
    if bytes >= MEGABYTE {
        format!("{:.2} MiB", bytes as f64 / MEGABYTE as f64)
    } else if bytes >= 1024 {
        format!("{:.1} KiB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}

#[derive(Default, Props)]
pub struct ProgressBarProps {
    pub title: String,
    pub progress: Option<watch::Receiver<UploadProgress>>,
}

#[component]
pub fn ProgressBar(props: &ProgressBarProps, mut hooks: Hooks) -> impl Into<AnyElement<'static>> {
    let mut uploaded = hooks.use_state(|| 0u64);
    let mut total = hooks.use_state(|| 0u64);
    let receiver = props.progress.clone();

    hooks.use_future(async move {
        let Some(mut receiver) = receiver else {
            return;
        };
        while receiver.changed().await.is_ok() {
            let progress = receiver.borrow_and_update().clone();
            uploaded.set(progress.bytes_uploaded);
            total.set(progress.total_bytes);
        }
    });

    let percent = if total.get() == 0 {
        0.0
    } else {
        uploaded.get() as f32 / total.get() as f32 * 100.0
    };

    element! {
        View(flex_direction: FlexDirection::Column) {
            View(flex_direction: FlexDirection::Row) {
                Spinner()
                Text(weight: Weight::Bold, content: format!(" {}", props.title))
            }
            View(border_style: BorderStyle::Round, border_color: Color::Blue, width: 60) {
                View(width: Percent(percent), height: 1, background_color: Color::Green)
            }
            Text(content: format!(
                "{:.0}%  {} / {}",
                percent,
                human_size(uploaded.get()),
                human_size(total.get())
            ))
        }
    }
}

const SPINNER_FRAMES: [&str; 8] = ["⣾", "⣽", "⣻", "⢿", "⡿", "⣟", "⣯", "⣷"];

#[derive(Default, Props)]
pub struct SpinnerProps {
    pub color: Option<Color>,
}

#[component]
pub fn Spinner(props: &SpinnerProps, mut hooks: Hooks) -> impl Into<AnyElement<'static>> {
    let mut frame = hooks.use_state(|| 0usize);

    hooks.use_future(async move {
        let mut ticker = tokio::time::interval(tokio::time::Duration::from_millis(120));
        loop {
            ticker.tick().await;
            frame.set((frame.get() + 1) % SPINNER_FRAMES.len());
        }
    });

    element! {
        Text(
            content: SPINNER_FRAMES[frame.get()],
            color: props.color.unwrap_or(Color::Blue)
        )
    }
}

#[derive(Default, Props)]
pub struct SubmittedFilesProps {
    pub files: Vec<SubmittedFile>,
}

#[component]
pub fn SubmittedFiles(props: &SubmittedFilesProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Column) {
            #(props.files.iter().map(|file| {
                let mode = if file.chunked { "chunked" } else { "single" };
                element! {
                    View(flex_direction: FlexDirection::Row) {
                        Text(color: Color::Green, content: "◆ ")
                        Text(weight: Weight::Bold, content: file.name.clone())
                        Text(content: format!("  {} ({})", human_size(file.size), mode))
                        #(file.web_url.as_ref().map(|url| element! {
                            Text(color: Color::Blue, content: format!("  {}", url))
                        }))
                    }
                }
            }))
        }
    }
}

#[derive(Default, Props)]
pub struct UploadPlanProps {
    pub file_name: String,
    pub total_bytes: u64,
    pub strategy: Option<UploadStrategy>,
    pub ranges: Vec<ByteRange>,
}

#[component]
pub fn UploadPlan(props: &UploadPlanProps) -> impl Into<AnyElement<'static>> {
    let summary = match props.strategy {
        Some(UploadStrategy::Chunked { chunk_size }) => format!(
            "resumable session, {} chunks of {}",
            props.ranges.len(),
            human_size(chunk_size)
        ),
        _ => "single PUT".to_string(),
    };

    element! {
        View(flex_direction: FlexDirection::Column) {
            View(flex_direction: FlexDirection::Row) {
                Text(content: "┌ ")
                View(background_color: Color::Blue) {
                    Text(content: &props.file_name, color: Color::White)
                }
                Text(content: format!("  {}", human_size(props.total_bytes)))
            }
            #(props.ranges.iter().enumerate().map(|(i, range)| element! {
                Text(content: format!("│ #{:<4} {}", i, range.content_range()))
            }))
            View(flex_direction: FlexDirection::Row) {
                Text(content: "└ ")
                Text(content: summary)
            }
        }
    }
}

#[component]
pub fn ConfigHeader() -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Column, margin_bottom: 1) {
            Text(weight: Weight::Bold, color: Color::Blue, content: "classdrop configuration")
            Text(content: "Press enter to keep the value in brackets.")
        }
    }
}

#[derive(Default, Props)]
pub struct InputPromptProps {
    pub prompt: String,
    pub default: Option<String>,
    pub description: Option<String>,
}

#[component]
pub fn InputPrompt(props: &InputPromptProps) -> impl Into<AnyElement<'static>> {
    let label = match &props.default {
        Some(default) => format!("{} [{}]", props.prompt, default),
        None => props.prompt.clone(),
    };

    element! {
        View(flex_direction: FlexDirection::Column) {
            Text(weight: Weight::Bold, content: label)
            #(props.description.as_ref().map(|description| element! {
                Text(color: Color::Grey, content: description.clone())
            }))
        }
    }
}

#[derive(Default, Props)]
pub struct MessageProps {
    pub message: String,
}

#[component]
pub fn ErrorMessage(props: &MessageProps) -> impl Into<AnyElement<'static>> {
    element! {
        Text(color: Color::Red, content: format!("▲ {}", props.message))
    }
}

#[component]
pub fn SuccessMessage(props: &MessageProps) -> impl Into<AnyElement<'static>> {
    element! {
        Text(color: Color::Green, content: format!("◆ {}", props.message))
    }
}
