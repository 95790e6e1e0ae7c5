//! Decimal payload parsing for VE.Direct numeric fields.

use nom::character::complete;
use nom::combinator::all_consuming;
use nom::IResult;

type Buf = [u8];

fn int8(buf: &Buf) -> IResult<&Buf, i8> {
    complete::i8(buf)
}

fn int16(buf: &Buf) -> IResult<&Buf, i16> {
    complete::i16(buf)
}

fn int32(buf: &Buf) -> IResult<&Buf, i32> {
    complete::i32(buf)
}

/// The whole buffer must be a signed decimal number that fits the target type.
fn finish<'a, O, F>(parser: F, buf: &'a Buf) -> Option<O>
where
    F: FnMut(&'a Buf) -> IResult<&'a Buf, O>,
{
    all_consuming(parser)(buf).ok().map(|(_rest, value)| value)
}

pub(crate) fn decimal_i8(buf: &Buf) -> Option<i8> {
    finish(int8, buf)
}

pub(crate) fn decimal_i16(buf: &Buf) -> Option<i16> {
    finish(int16, buf)
}

pub(crate) fn decimal_i32(buf: &Buf) -> Option<i32> {
    finish(int32, buf)
}
