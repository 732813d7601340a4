use serde::ser::{SerializeMap, SerializeStruct, Serializer};
use serde::Serialize;

use crate::Record;
use crate::variance::{FieldSource, VarianceSet, compute_variance};

pub const UNKNOWN_GROUP: &str = "Unknown";

/// Field-wise sums of every record sharing one group value in one period.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupAggregate {
    pub group: String,
    pub members: usize,
    sums: Vec<(String, f64)>,
}

impl GroupAggregate {
    fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            members: 0,
            sums: Vec::new(),
        }
    }

    fn absorb(&mut self, record: &Record) {
        self.members += 1;
        for (field, value) in record.field_amounts() {
            let Some(value) = value else {
                continue;
            };
            match self.sums.iter_mut().find(|(name, _)| name == field) {
                Some((_, sum)) => *sum += value,
                None => self.sums.push((field.to_owned(), value)),
            }
        }
    }

    pub fn sums(&self) -> &[(String, f64)] {
        &self.sums
    }

    pub fn sum(&self, field: &str) -> Option<f64> {
        self.sums
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, sum)| *sum)
    }

    pub fn mean(&self, field: &str) -> Option<f64> {
        if self.members == 0 {
            return None;
        }
        self.sum(field).map(|sum| sum / self.members as f64)
    }

    pub fn means(&self) -> Vec<(&str, f64)> {
        self.sums
            .iter()
            .filter_map(|(field, _)| Some((field.as_str(), self.mean(field)?)))
            .collect()
    }
}

impl FieldSource for GroupAggregate {
    fn field_amounts(&self) -> Vec<(&str, Option<f64>)> {
        self.sums
            .iter()
            .map(|(field, sum)| (field.as_str(), Some(*sum)))
            .collect()
    }
}

struct OrderedAmounts<'a>(Vec<(&'a str, f64)>);

impl Serialize for OrderedAmounts<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (field, value) in &self.0 {
            map.serialize_entry(field, value)?;
        }
        map.end()
    }
}

impl Serialize for GroupAggregate {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sums = OrderedAmounts(
            self.sums
                .iter()
                .map(|(field, sum)| (field.as_str(), *sum))
                .collect(),
        );
        let mut state = serializer.serialize_struct("GroupAggregate", 4)?;
        state.serialize_field("group", &self.group)?;
        state.serialize_field("members", &self.members)?;
        state.serialize_field("sums", &sums)?;
        state.serialize_field("means", &OrderedAmounts(self.means()))?;
        state.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupVariance {
    pub group: String,
    pub variance: VarianceSet,
}

/// One aggregate per distinct group value, in first-seen order. Records
/// without a group value land in [`UNKNOWN_GROUP`].
pub fn aggregate_by_group<'a, I>(records: I) -> Vec<GroupAggregate>
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut aggregates: Vec<GroupAggregate> = Vec::new();
    for record in records {
        let group = record.group_key().unwrap_or(UNKNOWN_GROUP);
        let index = match aggregates.iter().position(|aggregate| aggregate.group == group) {
            Some(index) => index,
            None => {
                aggregates.push(GroupAggregate::new(group));
                aggregates.len() - 1
            }
        };
        aggregates[index].absorb(record);
    }
    aggregates
}

/// Pairs groups across periods (current order, then groups only the
/// previous period has) and runs each pair through the variance engine.
pub fn group_variance(
    current: &[GroupAggregate],
    previous: &[GroupAggregate],
) -> Vec<GroupVariance> {
    let empty: &[(&str, f64)] = &[];
    let mut groups: Vec<&str> = Vec::new();
    for aggregate in current.iter().chain(previous.iter()) {
        if !groups.contains(&aggregate.group.as_str()) {
            groups.push(aggregate.group.as_str());
        }
    }

    groups
        .into_iter()
        .map(|group| {
            let current_aggregate = current.iter().find(|aggregate| aggregate.group == group);
            let previous_aggregate = previous.iter().find(|aggregate| aggregate.group == group);
            let variance = match (current_aggregate, previous_aggregate) {
                (Some(current), Some(previous)) => compute_variance(current, previous),
                (Some(current), None) => compute_variance(current, empty),
                (None, Some(previous)) => compute_variance(empty, previous),
                (None, None) => compute_variance(empty, empty),
            };
            GroupVariance {
                group: group.to_owned(),
                variance,
            }
        })
        .collect()
}
