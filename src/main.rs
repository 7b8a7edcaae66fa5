use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use iced::{
    widget::{
        button, column, container, horizontal_space, image, markdown, pick_list, row, scrollable,
        text, text_input, text_input::Id,
    },
    Element, Length, Task, Theme, Subscription,
    time, clipboard,
    keyboard::{self, Key},
    event::{self, Event as IcedEvent},
    alignment, Padding,
    window,
};
use tracing_subscriber::EnvFilter;

use nutrilens::capture::{self, StagedImage};
use nutrilens::chat::{self, ChatLog, ChatMessage, InputKind, MessageId, Sender};
use nutrilens::client::{AnalysisClient, AnalysisModel, AnalysisQuery};
use nutrilens::config::Config;
use nutrilens::relay;

const RELAY_STARTING: &str =
    "The analysis service is still starting up. Please try again in a moment.";

fn main() -> iced::Result {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::load();

    iced::application("Nutrilens", App::update, App::view)
        .theme(App::theme)
        .subscription(App::subscription)
        .window(window::Settings {
            size: iced::Size::new(config.window.width as f32, config.window.height as f32),
            position: window::Position::Centered,
            ..Default::default()
        })
        .run_with(App::new)
}

#[derive(Debug, Clone)]
enum Message {
    RelayStarted(Result<SocketAddr, String>),
    InputChanged(String),
    ModelSelected(AnalysisModel),
    Submit,
    ResponseReceived(String),
    AnalysisFailed(String),
    PickImage,
    CaptureScreen,
    ImageSelected(Option<PathBuf>),
    ImageStaged(Option<StagedImage>),
    PasteImage,
    RemoveImage,
    DeleteMessage(MessageId),
    CopyResult(MessageId),
    LinkClicked(markdown::Url),
    Tick,
}

struct App {
    input_text: String,
    chat: ChatLog,
    staged: Option<StagedImage>,
    model: AnalysisModel,
    client: Option<AnalysisClient>,
    clipboard: Option<arboard::Clipboard>,
    markdown: HashMap<MessageId, Vec<markdown::Item>>,
    loading_frame: usize,
    input_id: Id,
}

impl App {
    fn new() -> (Self, Task<Message>) {
        let config = Config::load();
        let input_id = Id::unique();

        let app = App {
            input_text: String::new(),
            chat: ChatLog::default(),
            staged: None,
            model: config.default_model(),
            client: None,
            clipboard: arboard::Clipboard::new().ok(),
            markdown: HashMap::new(),
            loading_frame: 0,
            input_id: input_id.clone(),
        };

        let backend_url = config.backend.url;
        let relay_task = Task::future(async move {
            match relay::start(backend_url).await {
                Ok(addr) => Message::RelayStarted(Ok(addr)),
                Err(e) => Message::RelayStarted(Err(e.to_string())),
            }
        });

        (app, Task::batch([text_input::focus(input_id), relay_task]))
    }

    fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::RelayStarted(Ok(addr)) => {
                self.client = Some(AnalysisClient::new(addr));
                Task::none()
            }
            Message::RelayStarted(Err(e)) => {
                tracing::error!("failed to start the analysis relay: {e}");
                self.chat
                    .push_error(format!("The analysis service failed to start: {e}"));
                Task::none()
            }
            Message::InputChanged(value) => {
                self.input_text = value;
                Task::none()
            }
            Message::ModelSelected(model) => {
                self.model = model;
                Task::none()
            }
            Message::Submit => {
                let text = self.input_text.trim().to_string();
                if !chat::submission_eligible(&text, self.staged.is_some()) {
                    return Task::none();
                }
                if !self.chat.begin_request() {
                    return Task::none();
                }

                // The image wins when both are present.
                let query = if let Some(image) = self.staged.take() {
                    self.chat.push_user_image(image.preview.clone());
                    AnalysisQuery::Image {
                        data_uri: capture::to_data_uri(&image),
                    }
                } else {
                    self.chat.push_user_text(&text);
                    AnalysisQuery::Text(text)
                };
                self.input_text.clear();

                let Some(client) = self.client.clone() else {
                    self.chat.push_error(RELAY_STARTING.to_string());
                    self.chat.finish_request();
                    return Task::none();
                };
                let model = self.model;

                Task::future(async move {
                    match client.analyze(query, model).await {
                        Ok(content) => Message::ResponseReceived(content),
                        Err(explanation) => Message::AnalysisFailed(explanation),
                    }
                })
            }
            Message::ResponseReceived(content) => {
                let id = self.chat.push_assistant(content.clone());
                self.markdown.insert(id, markdown::parse(&content).collect());
                self.chat.finish_request();
                Task::none()
            }
            Message::AnalysisFailed(explanation) => {
                self.chat.push_error(explanation);
                self.chat.finish_request();
                Task::none()
            }
            Message::PickImage => Task::future(async {
                let file = rfd::AsyncFileDialog::new()
                    .add_filter("Images", &["png", "jpg", "jpeg", "gif", "webp", "bmp"])
                    .pick_file()
                    .await;
                Message::ImageSelected(file.map(|f| f.path().to_path_buf()))
            }),
            Message::CaptureScreen => Task::future(async {
                match tokio::task::spawn_blocking(capture::capture_screen).await {
                    Ok(Ok(path)) => Message::ImageSelected(Some(path)),
                    Ok(Err(e)) => {
                        tracing::warn!("screen capture failed: {e}");
                        Message::ImageSelected(None)
                    }
                    Err(e) => {
                        tracing::warn!("screen capture task failed: {e}");
                        Message::ImageSelected(None)
                    }
                }
            }),
            Message::ImageSelected(Some(path)) => Task::future(async move {
                match capture::load_file(path).await {
                    Ok(image) => Message::ImageStaged(Some(image)),
                    Err(e) => {
                        tracing::debug!("ignoring selected payload: {e}");
                        Message::ImageStaged(None)
                    }
                }
            }),
            Message::ImageSelected(None) => Task::none(),
            Message::ImageStaged(Some(image)) => {
                // Replaces any previously staged image.
                self.staged = Some(image);
                Task::none()
            }
            Message::ImageStaged(None) => Task::none(),
            Message::PasteImage => {
                if let Some(clipboard) = self.clipboard.as_mut() {
                    if let Some(image) = capture::from_clipboard(clipboard) {
                        self.staged = Some(image);
                    }
                }
                Task::none()
            }
            Message::RemoveImage => {
                self.staged = None;
                Task::none()
            }
            Message::DeleteMessage(id) => {
                self.chat.delete(id);
                self.markdown.remove(&id);
                Task::none()
            }
            Message::CopyResult(id) => {
                let content = self
                    .chat
                    .messages()
                    .iter()
                    .find(|message| message.id == id)
                    .and_then(|message| message.result.clone());
                match content {
                    Some(content) => clipboard::write(content),
                    None => Task::none(),
                }
            }
            Message::LinkClicked(_) => Task::none(),
            Message::Tick => {
                if self.chat.is_busy() {
                    self.loading_frame = (self.loading_frame + 1) % 40; // 10 frames * 4 phrases
                }
                Task::none()
            }
        }
    }

    fn subscription(&self) -> Subscription<Message> {
        let timer = if self.chat.is_busy() {
            time::every(Duration::from_millis(80)).map(|_| Message::Tick)
        } else {
            Subscription::none()
        };

        let events = event::listen_with(|event, _status, _id| match event {
            IcedEvent::Window(window::Event::FileDropped(path)) => {
                Some(Message::ImageSelected(Some(path)))
            }
            IcedEvent::Keyboard(keyboard::Event::KeyPressed {
                key: Key::Named(keyboard::key::Named::Escape),
                ..
            }) => Some(Message::RemoveImage),
            IcedEvent::Keyboard(keyboard::Event::KeyPressed {
                key: Key::Character(ref c),
                modifiers,
                ..
            }) if c.as_str() == "v" && modifiers.command() => Some(Message::PasteImage),
            _ => None,
        });

        Subscription::batch([timer, events])
    }

    fn view(&self) -> Element<Message> {
        let header = row![
            text("Nutrilens").size(20),
            horizontal_space(),
            pick_list(&AnalysisModel::ALL[..], Some(self.model), Message::ModelSelected),
        ]
        .spacing(10)
        .align_y(alignment::Vertical::Center);

        let conversation: Element<Message> = if self.chat.is_empty() {
            container(
                column![
                    text("Welcome to Nutrilens").size(26),
                    text("Type a food name or add a photo to learn its nutrition facts and benefits")
                        .size(15),
                ]
                .spacing(8)
                .align_x(alignment::Horizontal::Center),
            )
            .width(Length::Fill)
            .height(Length::Fill)
            .align_x(alignment::Horizontal::Center)
            .align_y(alignment::Vertical::Center)
            .into()
        } else {
            let mut feed = column![].spacing(18).padding(Padding::from([10, 4]));
            for message in self.chat.messages() {
                feed = feed.push(self.message_card(message));
            }
            if self.chat.is_busy() {
                feed = feed.push(self.loading_indicator());
            }
            scrollable(feed).height(Length::Fill).into()
        };

        let mut compose = column![].spacing(8);
        if let Some(staged) = &self.staged {
            compose = compose.push(
                row![
                    image(staged.preview.clone()).height(120),
                    button(text("Remove").size(12))
                        .style(button::text)
                        .on_press(Message::RemoveImage),
                ]
                .spacing(8)
                .align_y(alignment::Vertical::Center),
            );
        }

        let busy = self.chat.is_busy();
        let can_submit = chat::submission_eligible(&self.input_text, self.staged.is_some());

        let input = text_input("Type a food name or add a photo...", &self.input_text)
            .on_input(Message::InputChanged)
            .on_submit(Message::Submit)
            .padding(12)
            .size(15)
            .id(self.input_id.clone());

        let controls = row![
            input,
            button(text("Photo").size(13))
                .on_press_maybe((!busy).then_some(Message::PickImage))
                .padding(8),
            button(text("Capture").size(13))
                .on_press_maybe((!busy).then_some(Message::CaptureScreen))
                .padding(8),
            button(text("Send").size(13))
                .on_press_maybe((can_submit && !busy).then_some(Message::Submit))
                .padding(8),
        ]
        .spacing(8)
        .align_y(alignment::Vertical::Center);

        compose = compose.push(controls);

        container(column![header, conversation, compose].spacing(12).padding(14))
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }

    fn message_card<'a>(&'a self, message: &'a ChatMessage) -> Element<'a, Message> {
        match message.sender {
            Sender::User => {
                let body: Element<Message> = match (&message.kind, &message.preview) {
                    (InputKind::Image, Some(preview)) => image(preview.clone()).height(220).into(),
                    _ => container(text(&message.input).size(15))
                        .padding(Padding::from([8, 12]))
                        .style(container::rounded_box)
                        .into(),
                };
                let controls = button(text("Delete").size(12))
                    .style(button::text)
                    .on_press(Message::DeleteMessage(message.id))
                    .padding(2);

                container(
                    column![body, controls]
                        .spacing(4)
                        .align_x(alignment::Horizontal::Right),
                )
                .width(Length::Fill)
                .align_x(alignment::Horizontal::Right)
                .into()
            }
            Sender::Assistant => {
                let content = message.result.as_deref().unwrap_or_default();
                let body: Element<Message> = if message.error {
                    text(format!("⚠ {content}")).size(15).style(text::danger).into()
                } else if let Some(items) = self.markdown.get(&message.id) {
                    markdown::view(
                        items,
                        markdown::Settings::default(),
                        markdown::Style::from_palette(self.theme().palette()),
                    )
                    .map(Message::LinkClicked)
                } else {
                    text(content).size(15).into()
                };

                let mut controls = row![].spacing(6);
                if !message.error {
                    controls = controls.push(
                        button(text("Copy").size(12))
                            .style(button::text)
                            .on_press(Message::CopyResult(message.id))
                            .padding(2),
                    );
                }
                controls = controls.push(
                    button(text("Delete").size(12))
                        .style(button::text)
                        .on_press(Message::DeleteMessage(message.id))
                        .padding(2),
                );

                column![body, controls].spacing(4).width(Length::Fill).into()
            }
        }
    }

    fn loading_indicator(&self) -> Element<'static, Message> {
        let frames = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
        let phrases = [
            "Reading the label...",
            "Weighing the portions...",
            "Counting the calories...",
            "Consulting the food database...",
        ];

        let phrase = (self.loading_frame / 10) % phrases.len();
        let spinner = self.loading_frame % frames.len();

        row![
            text(frames[spinner]).size(16),
            text(phrases[phrase]).size(14),
        ]
        .spacing(8)
        .align_y(alignment::Vertical::Center)
        .into()
    }

    fn theme(&self) -> Theme {
        Theme::TokyoNight
    }
}
