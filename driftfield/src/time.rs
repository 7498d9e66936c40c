use crate::{
    errors::{Error, Result},
    helpers::rearrange,
    source::TimeCoordinate,
};

/// Which way simulation time runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    /// `1` forward, `-1` backward
    pub fn sign(&self) -> i64 {
        match self {
            Direction::Forward => 1,
            Direction::Backward => -1,
        }
    }

    pub fn signum(&self) -> f64 {
        self.sign() as f64
    }
}

/// Number of seconds in one unit of a time coordinate, guessed from its units attribute.
///
/// Anything not recognizably hours or days is taken to be seconds.
///
pub fn seconds_per_unit(units: Option<&str>) -> f64 {
    let units = match units {
        Some(units) => units.to_lowercase(),
        None => return 1.0,
    };

    if units.contains("second") {
        1.0
    } else if units.contains("hour") {
        3600.0
    } else if units.contains("day") {
        86400.0
    } else {
        1.0
    }
}

/// Time stamps, in seconds, of every rank in one dataset file.
#[derive(Clone, Debug)]
pub struct FileTimes {
    pub location: String,
    pub times: Vec<f64>,
}

impl FileTimes {
    pub fn new(location: impl Into<String>, coordinate: &TimeCoordinate) -> Self {
        let scale = seconds_per_unit(coordinate.units.as_deref());
        let times = coordinate.values.iter().map(|t| t * scale).collect();

        Self {
            location: location.into(),
            times,
        }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn first(&self) -> f64 {
        self.times[0]
    }

    pub fn last(&self) -> f64 {
        self.times[self.times.len() - 1]
    }

    /// Whether `time` falls within this file, looking in the direction of time.
    fn contains(&self, time: f64, direction: Direction) -> bool {
        let (first, last) = rearrange(self.first(), self.last());
        if first == last {
            return time == first;
        }

        match direction {
            Direction::Forward => time >= first && time < last,
            Direction::Backward => time > first && time <= last,
        }
    }

    /// Rank whose snapshot opens the interpolation interval for `time`.
    ///
    /// Going forward that's the last rank at or before `time`, going backward the first rank at
    /// or after it. May be out of range if `time` lies outside the file.
    ///
    pub fn rank(&self, time: f64, direction: Direction) -> isize {
        let count = match direction {
            Direction::Forward => self.times.iter().take_while(|&&t| t <= time).count(),
            Direction::Backward => self.times.iter().take_while(|&&t| t < time).count(),
        };

        match direction {
            Direction::Forward => count as isize - 1,
            Direction::Backward => count as isize,
        }
    }
}

/// Position of one snapshot within a dataset: which file, and which rank in that file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cursor {
    pub file: usize,
    pub rank: usize,
}

/// The time axes of a chronologically ordered sequence of dataset files.
///
#[derive(Clone, Debug)]
pub struct Timeline {
    files: Vec<FileTimes>,
}

impl Timeline {
    /// Files without any time record are left out. Remaining files are sorted by first time.
    pub fn new(mut files: Vec<FileTimes>) -> Self {
        files.retain(|file| file.len() > 0);
        files.sort_by(|a, b| a.first().total_cmp(&b.first()));

        Self { files }
    }

    pub fn files(&self) -> &[FileTimes] {
        &self.files
    }

    pub fn location(&self, cursor: Cursor) -> &str {
        &self.files[cursor.file].location
    }

    pub fn time(&self, cursor: Cursor) -> f64 {
        self.files[cursor.file].times[cursor.rank]
    }

    /// Find the snapshot that opens the interpolation interval containing `time`.
    ///
    pub fn locate(&self, variable: &str, time: f64, direction: Direction) -> Result<Cursor> {
        let not_found = || Error::TimeNotFound {
            variable: variable.to_string(),
            time,
        };

        let file = self
            .files
            .iter()
            .position(|file| file.contains(time, direction))
            .or_else(|| self.between(time, direction))
            .ok_or_else(not_found)?;

        let rank = self.files[file].rank(time, direction);
        if rank < 0 || rank as usize >= self.files[file].len() {
            return Err(not_found());
        }

        Ok(Cursor {
            file,
            rank: rank as usize,
        })
    }

    /// Index of the file to start from when `time` falls in the gap between two files.
    fn between(&self, time: f64, direction: Direction) -> Option<usize> {
        self.files
            .windows(2)
            .position(|pair| time >= pair[0].last() && time < pair[1].first())
            .map(|index| match direction {
                Direction::Forward => index,
                Direction::Backward => index + 1,
            })
    }

    /// The snapshot following `cursor` in the direction of time, crossing into the neighboring
    /// file when `cursor` is at the edge of its own. `None` once the data runs out.
    ///
    pub fn next(&self, cursor: Cursor, direction: Direction) -> Option<Cursor> {
        let len = self.files[cursor.file].len();
        match direction {
            Direction::Forward => {
                if cursor.rank + 1 < len {
                    Some(Cursor {
                        file: cursor.file,
                        rank: cursor.rank + 1,
                    })
                } else if cursor.file + 1 < self.files.len() {
                    Some(Cursor {
                        file: cursor.file + 1,
                        rank: 0,
                    })
                } else {
                    None
                }
            }
            Direction::Backward => {
                if cursor.rank > 0 {
                    Some(Cursor {
                        file: cursor.file,
                        rank: cursor.rank - 1,
                    })
                } else if cursor.file > 0 {
                    let file = cursor.file - 1;
                    Some(Cursor {
                        file,
                        rank: self.files[file].len() - 1,
                    })
                } else {
                    None
                }
            }
        }
    }
}
