use async_channel::{Receiver, Sender, TryRecvError};
use glam::UVec2;
use image::RgbaImage;
use tracing::{debug, warn};

use crate::RenderError;

/// A drawable area owned by the host (a window region, a canvas, an offscreen target).
pub trait RenderSurface {
    /// Acquire the drawing context and return the current drawable size in pixels.
    fn acquire(&mut self) -> Result<UVec2, RenderError>;

    /// Subscribe to container size changes. Only the first call yields a receiver;
    /// dropping it unsubscribes.
    fn subscribe_resize(&mut self) -> Option<Receiver<UVec2>>;

    /// Hand a finished frame to the host.
    fn present(&mut self, frame: RgbaImage);

    /// Detach from the host. Called once by the renderer on dispose.
    fn release(&mut self);
}

const FRAME_QUEUE: usize = 2;

/// Create a surface whose frames and resize events travel over channels, together
/// with the host side of those channels.
pub fn channel_surface(size: UVec2) -> (ChannelSurface, SurfaceHost) {
    let (resize_tx, resize_rx) = async_channel::unbounded();
    // Only the newest couple of frames matter, the host drains every refresh.
    let (frame_tx, frame_rx) = async_channel::bounded(FRAME_QUEUE);

    (
        ChannelSurface {
            size,
            resize_rx: Some(resize_rx),
            frame_tx,
        },
        SurfaceHost {
            resize_tx,
            frame_rx,
        },
    )
}

pub struct ChannelSurface {
    size: UVec2,
    resize_rx: Option<Receiver<UVec2>>,
    frame_tx: Sender<RgbaImage>,
}

impl RenderSurface for ChannelSurface {
    fn acquire(&mut self) -> Result<UVec2, RenderError> {
        if self.frame_tx.is_closed() {
            return Err(RenderError::SurfaceUnavailable(
                "host side of the surface is gone".to_owned(),
            ));
        }
        if self.size.x == 0 || self.size.y == 0 {
            return Err(RenderError::SurfaceUnavailable(format!(
                "container has no area ({}x{})",
                self.size.x, self.size.y
            )));
        }
        Ok(self.size)
    }

    fn subscribe_resize(&mut self) -> Option<Receiver<UVec2>> {
        self.resize_rx.take()
    }

    fn present(&mut self, frame: RgbaImage) {
        // A host that fell behind loses its oldest frame, never the newest.
        match self.frame_tx.force_send(frame) {
            Ok(Some(_)) => debug!("Host is behind, evicted oldest frame"),
            Ok(None) => (),
            Err(_) => warn!("Presenting to a closed surface"),
        }
    }

    fn release(&mut self) {
        self.resize_rx = None;
        self.frame_tx.close();
    }
}

/// Host end of a [`ChannelSurface`].
pub struct SurfaceHost {
    resize_tx: Sender<UVec2>,
    frame_rx: Receiver<RgbaImage>,
}

impl SurfaceHost {
    /// Report a new container size. Returns false once the viewer has unsubscribed.
    pub fn resize(&self, size: UVec2) -> bool {
        self.resize_tx.try_send(size).is_ok()
    }

    /// Drain presented frames and keep the newest one.
    pub fn latest_frame(&self) -> Option<RgbaImage> {
        let mut latest = None;
        loop {
            match self.frame_rx.try_recv() {
                Ok(frame) => latest = Some(frame),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        latest
    }

    /// Whether a renderer is still bound to the other end.
    pub fn is_attached(&self) -> bool {
        !self.frame_rx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sized_container_is_unavailable() {
        let (mut surface, _host) = channel_surface(UVec2::new(0, 10));
        assert!(matches!(
            surface.acquire(),
            Err(RenderError::SurfaceUnavailable(_))
        ));
    }

    #[test]
    fn dropped_host_is_unavailable() {
        let (mut surface, host) = channel_surface(UVec2::new(10, 10));
        drop(host);
        assert!(surface.acquire().is_err());
    }

    #[test]
    fn resize_subscription_is_exclusive_and_closes_on_drop() {
        let (mut surface, host) = channel_surface(UVec2::new(10, 10));
        let rx = surface.subscribe_resize().unwrap();
        assert!(surface.subscribe_resize().is_none());
        assert!(host.resize(UVec2::new(20, 20)));
        assert_eq!(rx.try_recv().unwrap(), UVec2::new(20, 20));
        drop(rx);
        assert!(!host.resize(UVec2::new(30, 30)));
    }

    #[test]
    fn lagging_host_still_gets_newest_frame() {
        let (mut surface, host) = channel_surface(UVec2::new(4, 4));
        for width in 1..=FRAME_QUEUE as u32 + 1 {
            surface.present(RgbaImage::new(width, 1));
        }
        assert_eq!(
            host.latest_frame().map(|f| f.width()),
            Some(FRAME_QUEUE as u32 + 1)
        );
    }

    #[test]
    fn host_keeps_newest_frame() {
        let (mut surface, host) = channel_surface(UVec2::new(4, 4));
        surface.present(RgbaImage::new(1, 1));
        surface.present(RgbaImage::new(2, 2));
        assert_eq!(host.latest_frame().unwrap().width(), 2);
        assert!(host.latest_frame().is_none());

        surface.release();
        assert!(!host.is_attached());
    }
}
