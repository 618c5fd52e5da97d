use crate::channels::{ChannelSnapshot, SharedChannels};
use crate::charts::{HrvBarChart, StripChart, EDA_COLOR, GSR_COLOR, GYRO_COLORS, IBI_COLOR};
use crate::packet::SensorSchema;
use iced::widget::{column, container, row, text};
use iced::{Element, Length, Subscription, Task};
use plotters::style::{BLUE, MAGENTA};
use plotters_iced::ChartWidget;
use std::time::Duration;

// Iced Application State
pub struct AtaraxiaMonitor {
    channels: SharedChannels,
    snapshot: ChannelSnapshot,
    schema: SensorSchema,
    listen_addr: String,
    render_interval: Duration,
}

#[derive(Debug, Clone)]
pub enum Message {
    Tick,
}

impl AtaraxiaMonitor {
    pub fn new(
        channels: SharedChannels,
        schema: SensorSchema,
        listen_addr: String,
        render_interval: Duration,
    ) -> (Self, Task<Message>) {
        let snapshot = channels.snapshot();
        (
            AtaraxiaMonitor {
                channels,
                snapshot,
                schema,
                listen_addr,
                render_interval,
            },
            Task::none(),
        )
    }

    pub fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::Tick => {
                // Copy under the lock, draw from the copy
                self.snapshot = self.channels.snapshot();
                Task::none()
            }
        }
    }

    pub fn subscription(&self) -> Subscription<Message> {
        iced::time::every(self.render_interval).map(|_| Message::Tick)
    }

    pub fn view(&'_ self) -> Element<'_, Message> {
        let content = row![self.create_sidebar(), self.create_main_view()].spacing(0);

        container(content)
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }

    fn create_sidebar(&self) -> Element<'_, Message> {
        let snapshot = &self.snapshot;
        let stats = snapshot.stats;
        let participant = snapshot.participant.as_deref().unwrap_or("(no session)");

        let mut details = column![
            text("Session").size(20),
            text(format!("Participant: {}", participant)),
            text(format!("Phase: {}", snapshot.phase)),
            text(format!("Sensor: {}", self.schema.label())),
            text(format!("Listening on {}", self.listen_addr)).size(12),
            text("Ingest").size(20),
            text(format!("Datagrams: {}", stats.received)),
            text(format!("Malformed: {}", stats.malformed)),
            text(format!("Rows logged: {}", stats.logged)),
        ]
        .spacing(8);

        if self.schema == SensorSchema::EdaIbi {
            details = details
                .push(text(format!("IBI artifacts: {}", stats.artifacts)))
                .push(text("HRV").size(20));
            details = match &snapshot.latest_hrv {
                Some(hrv) => details
                    .push(text(format!("RMSSD: {:.1} ms", hrv.rmssd_ms)))
                    .push(text(format!("HF: {:.1} n.u.", hrv.hf_nu)))
                    .push(text(format!("SDNN: {:.1} ms", hrv.sdnn_ms)))
                    .push(text(format!("Mean HR: {:.0} bpm", hrv.mean_hr_bpm)))
                    .push(text(format!(
                        "Updated {} ({} beats)",
                        hrv.computed_at.format("%H:%M:%S"),
                        hrv.sample_count
                    ))
                    .size(12)),
                None => details.push(text("Waiting for enough clean beats")),
            };
        }

        container(details.padding(20).width(260))
            .style(container::bordered_box)
            .width(Length::Fixed(260.0))
            .height(Length::Fill)
            .into()
    }

    fn create_main_view(&self) -> Element<'_, Message> {
        let s = &self.snapshot;
        let plots: Element<'_, Message> = match self.schema {
            SensorSchema::Gsr => {
                column![chart(StripChart::new(
                    "GSR",
                    vec![(s.gsr.as_slice(), GSR_COLOR)]
                ))]
                .into()
            }
            SensorSchema::EdaIbi => {
                let metrics = row![
                    chart(HrvBarChart {
                        latest: s.latest_hrv.as_ref()
                    }),
                    chart(StripChart::new(
                        "RMSSD (ms) / HF (n.u.) history",
                        vec![(s.rmssd.as_slice(), BLUE), (s.hf_nu.as_slice(), MAGENTA)]
                    )),
                ]
                .spacing(10);
                column![
                    chart(StripChart::new("EDA", vec![(s.eda.as_slice(), EDA_COLOR)])),
                    chart(StripChart::new("IBI (ms)", vec![(s.ibi.as_slice(), IBI_COLOR)])),
                    metrics,
                ]
                .spacing(10)
                .into()
            }
            SensorSchema::Gyro => {
                let axes = [("Gyro X", &s.gyro_x), ("Gyro Y", &s.gyro_y), ("Gyro Z", &s.gyro_z)];
                column(
                    axes.into_iter()
                        .zip(GYRO_COLORS)
                        .map(|((title, values), color)| {
                            chart(StripChart::new(title, vec![(values.as_slice(), color)]))
                        }),
                )
                .spacing(10)
                .into()
            }
        };

        container(plots)
            .padding(20)
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }
}

fn chart<'a, C>(chart: C) -> Element<'a, Message>
where
    C: plotters_iced::Chart<Message> + 'a,
{
    ChartWidget::new(chart)
        .width(Length::Fill)
        .height(Length::Fill)
        .into()
}
