/// One Adam7 pass: origin and step in both directions.
#[derive(Debug, Clone, Copy)]
pub struct Pass {
    pub x0: u32,
    pub y0: u32,
    pub dx: u32,
    pub dy: u32,
}

#[rustfmt::skip]
pub const ADAM7: [Pass; 7] = [
    Pass { x0: 0, y0: 0, dx: 8, dy: 8 },
    Pass { x0: 4, y0: 0, dx: 8, dy: 8 },
    Pass { x0: 0, y0: 4, dx: 4, dy: 8 },
    Pass { x0: 2, y0: 0, dx: 4, dy: 4 },
    Pass { x0: 0, y0: 2, dx: 2, dy: 4 },
    Pass { x0: 1, y0: 0, dx: 2, dy: 2 },
    Pass { x0: 0, y0: 1, dx: 1, dy: 2 },
];

impl Pass {
    /// Width and height of the reduced image this pass covers.
    pub fn size(&self, width: u32, height: u32) -> (u32, u32) {
        let span = |extent: u32, origin: u32, step: u32| {
            if extent > origin {
                (extent - origin).div_ceil(step)
            } else {
                0
            }
        };
        (
            span(width, self.x0, self.dx),
            span(height, self.y0, self.dy),
        )
    }
}
